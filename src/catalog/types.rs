use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Listing category, each with its own paginated feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
  All,
  Sale,
  Rent,
  NewBuilds,
}

impl Category {
  pub const ALL: [Category; 4] = [
    Category::All,
    Category::Sale,
    Category::Rent,
    Category::NewBuilds,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Category::All => "all",
      Category::Sale => "sale",
      Category::Rent => "rent",
      Category::NewBuilds => "new-builds",
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Category {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "all" => Ok(Category::All),
      "sale" | "buy" => Ok(Category::Sale),
      "rent" => Ok(Category::Rent),
      "new-builds" | "new" | "newbuilds" => Ok(Category::NewBuilds),
      other => Err(format!("unknown category '{}'", other)),
    }
  }
}

/// Narrowing applied on top of a category feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingFilters {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min_price: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_price: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min_bedrooms: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub city: Option<String>,
}

impl ListingFilters {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  /// Canonical text form, used for hashing.
  pub fn canonical(&self) -> String {
    // Struct field order is fixed, so serde output is stable.
    serde_json::to_string(self).unwrap_or_default()
  }

  /// Query parameters for the catalog API.
  pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(v) = self.min_price {
      pairs.push(("min_price", v.to_string()));
    }
    if let Some(v) = self.max_price {
      pairs.push(("max_price", v.to_string()));
    }
    if let Some(v) = self.min_bedrooms {
      pairs.push(("min_bedrooms", v.to_string()));
    }
    if let Some(v) = &self.city {
      pairs.push(("city", v.clone()));
    }
    pairs
  }

  /// Apply one `key=value` assignment, as typed at the prompt.
  pub fn apply(&mut self, assignment: &str) -> Result<(), String> {
    let (key, value) = assignment
      .split_once('=')
      .ok_or_else(|| format!("expected key=value, got '{}'", assignment))?;
    let value = value.trim();
    let clear = value.is_empty();

    match key.trim() {
      "min_price" => self.min_price = parse_opt(value, clear)?,
      "max_price" => self.max_price = parse_opt(value, clear)?,
      "min_bedrooms" | "beds" => self.min_bedrooms = parse_opt(value, clear)?,
      "city" => self.city = (!clear).then(|| value.to_string()),
      other => return Err(format!("unknown filter '{}'", other)),
    }
    Ok(())
  }
}

fn parse_opt<T: FromStr>(value: &str, clear: bool) -> Result<Option<T>, String> {
  if clear {
    return Ok(None);
  }
  value
    .parse()
    .map(Some)
    .map_err(|_| format!("invalid number '{}'", value))
}

impl fmt::Display for ListingFilters {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self
      .query_pairs()
      .into_iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect();
    f.write_str(&parts.join(" "))
  }
}

/// A property listing. The data layer only relies on `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
  pub id: String,
  pub category_tags: BTreeSet<String>,
  pub created_at: DateTime<Utc>,
  pub title: String,
  pub price: Option<u64>,
  pub city: Option<String>,
  pub bedrooms: Option<u32>,
}

/// One page of a category feed as returned by the catalog service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPage {
  pub items: Vec<Listing>,
  pub total_count: u64,
  pub has_more: bool,
  pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_category_round_trips_through_display() {
    for category in Category::ALL {
      assert_eq!(category.to_string().parse::<Category>(), Ok(category));
    }
    assert!("castle".parse::<Category>().is_err());
  }

  #[test]
  fn test_filter_assignment() {
    let mut filters = ListingFilters::default();
    filters.apply("min_price=100000").unwrap();
    filters.apply("city=Porto").unwrap();
    assert_eq!(filters.min_price, Some(100_000));
    assert_eq!(filters.city.as_deref(), Some("Porto"));

    filters.apply("city=").unwrap();
    assert_eq!(filters.city, None);

    assert!(filters.apply("beds=two").is_err());
    assert!(filters.apply("garden=yes").is_err());
  }
}
