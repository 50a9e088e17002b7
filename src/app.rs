use crate::cache::{CacheResult, CacheSource, CacheStats};
use crate::catalog::{
  CachedCatalogClient, CatalogService, Category, HttpCatalogClient, Listing, ListingFilters,
  ListingPage, UpdateSource,
};
use crate::clock::{SharedClock, SystemClock};
use crate::commands::{self, COMMANDS};
use crate::config::{self, Config};
use crate::error::{CatalogError, CatalogResult};
use crate::event::{DataEvent, EventHandler};
use crate::kv::{KvStore, MemoryKvStore, SqliteKvStore};
use crate::version::{ProcessRestarter, Restarter};
use color_eyre::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Cached data layer
  client: Arc<CachedCatalogClient>,

  /// Where published updates are announced
  updates: Arc<dyn UpdateSource>,

  /// Data layer notifications
  events: EventHandler,

  /// Category the prompt operates on
  category: Category,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub async fn new(config: Config, ephemeral: bool) -> Result<Self> {
    let clock: SharedClock = Arc::new(SystemClock);
    let http = Arc::new(HttpCatalogClient::new(&config, clock.clone())?);

    let kv: Arc<dyn KvStore> = if ephemeral {
      Arc::new(MemoryKvStore::new())
    } else {
      Arc::new(SqliteKvStore::open()?)
    };

    let mut config = config;
    if config.version.scratch_dir.is_none() {
      config.version.scratch_dir = Some(config::default_scratch_dir()?);
    }

    Ok(Self::with_parts(
      config,
      http.clone(),
      http,
      kv,
      clock,
      Arc::new(ProcessRestarter),
    ))
  }

  fn with_parts(
    config: Config,
    catalog: Arc<dyn CatalogService>,
    updates: Arc<dyn UpdateSource>,
    kv: Arc<dyn KvStore>,
    clock: SharedClock,
    restarter: Arc<dyn Restarter>,
  ) -> Self {
    let events = EventHandler::new();
    let client = Arc::new(CachedCatalogClient::new(
      &config,
      catalog,
      kv,
      clock,
      restarter,
      events.sender(),
    ));
    let category = config.default_category.unwrap_or(Category::All);

    Self {
      config,
      client,
      updates,
      events,
      category,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    if self.client.run_startup_version_check().await? {
      // Wiped state from a previous build is not worth reporting as events.
      self.events.drain();
    }
    self.spawn_update_check();
    self.client.start();

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let greeting = self.execute(&format!("browse {}", self.category)).await;
    write_lines(&mut stdout, &greeting).await?;

    // Main loop
    while !self.should_quit {
      stdout.write_all(self.prompt().as_bytes()).await?;
      stdout.flush().await?;

      tokio::select! {
        line = lines.next_line() => {
          let Some(line) = line? else { break };
          let output = self.execute(&line).await;
          write_lines(&mut stdout, &output).await?;
        }
        Some(event) = self.events.next() => {
          let output = self.describe_event(event);
          write_lines(&mut stdout, &["".to_string(), output]).await?;
        }
      }
    }

    self.client.shutdown();
    Ok(())
  }

  /// Ask the catalog whether a newer update was published. A hit only takes
  /// effect on the next start.
  fn spawn_update_check(&self) {
    let client = self.client.clone();
    let updates = self.updates.clone();
    let policy = self.config.version.retry_policy();

    tokio::spawn(async move {
      match client
        .invalidator()
        .check_for_remote_update(updates.as_ref(), policy)
        .await
      {
        Ok(true) => info!("update available, caches will be cleared on next start"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "remote update check failed"),
      }
    });
  }

  fn prompt(&self) -> String {
    let filters = self.client.filters(self.category);
    if filters.is_empty() {
      format!("roost [{}]> ", self.category)
    } else {
      format!("roost [{} {}]> ", self.category, filters)
    }
  }

  /// Run one input line and return what to print.
  async fn execute(&mut self, line: &str) -> Vec<String> {
    if line.trim().is_empty() {
      return Vec::new();
    }
    let Some((cmd, args)) = commands::resolve(line) else {
      return vec![format!("Unknown command '{}'. Try 'help'.", line.trim())];
    };

    match cmd.name {
      "browse" => {
        if let Some(arg) = args.first() {
          match arg.parse() {
            Ok(category) => self.category = category,
            Err(e) => return vec![e],
          }
        }
        let size = self.client.page_size();
        let result = self
          .client
          .get_properties_by_type(self.category, 1, size)
          .await;
        self.describe_page(result, 1)
      }
      "more" => {
        self.client.load_more_properties(self.category);
        vec!["Loading more...".to_string()]
      }
      "page" => {
        let Some(page) = args.first().and_then(|p| p.parse::<u32>().ok()) else {
          return vec!["usage: page <n>".to_string()];
        };
        let size = self.client.page_size();
        let result = self
          .client
          .get_properties_by_type(self.category, page, size)
          .await;
        self.describe_page(result, page)
      }
      "refresh" => {
        let result = self.client.refresh_properties(self.category).await;
        self.describe_page(result, 1)
      }
      "filter" => self.filter(&args).await,
      "show" => match args.first() {
        Some(id) => match self.client.get_property(id).await {
          Ok(listing) => describe_listing_detail(&listing),
          Err(e) => vec![describe_error(&e)],
        },
        None => vec!["usage: show <id>".to_string()],
      },
      "invalidate" => {
        self.client.invalidate_cache();
        vec!["All categories will refetch on next read.".to_string()]
      }
      "stats" => self.stats(),
      "clear" => self.clear(args.first() == Some(&"now")).await,
      "restart" => match self
        .client
        .invalidator()
        .force_restart("requested from prompt")
        .await
      {
        Ok(()) => {
          self.should_quit = true;
          vec!["Restarting...".to_string()]
        }
        Err(e) => vec![format!("Restart failed: {}", e)],
      },
      "help" => COMMANDS
        .iter()
        .map(|c| format!("  {:<36} {}", c.usage, c.description))
        .collect(),
      "quit" => {
        self.should_quit = true;
        Vec::new()
      }
      _ => Vec::new(),
    }
  }

  async fn filter(&mut self, args: &[&str]) -> Vec<String> {
    let mut filters = if args.first() == Some(&"none") {
      ListingFilters::default()
    } else {
      self.client.filters(self.category)
    };

    for arg in args.iter().filter(|a| **a != "none") {
      if let Err(e) = filters.apply(arg) {
        return vec![e];
      }
    }

    if args.is_empty() {
      return vec![if filters.is_empty() {
        "No filters.".to_string()
      } else {
        filters.to_string()
      }];
    }

    self.client.set_filters(self.category, filters);
    let size = self.client.page_size();
    let result = self
      .client
      .get_properties_by_type(self.category, 1, size)
      .await;
    self.describe_page(result, 1)
  }

  async fn clear(&self, now: bool) -> Vec<String> {
    let invalidator = self.client.invalidator();
    let result = if now {
      invalidator.force_clear_all("requested from prompt").await
    } else {
      invalidator
        .set_force_clear_flag("requested from prompt")
        .await
    };
    match (result, now) {
      (Ok(()), true) => vec!["All cached data cleared.".to_string()],
      (Ok(()), false) => vec!["Cached data will be cleared on next start.".to_string()],
      (Err(e), _) => vec![format!("Clear failed: {}", e)],
    }
  }

  fn stats(&self) -> Vec<String> {
    let (pages, listings) = self.client.stats();
    let mut out = vec![
      describe_stats("pages", &pages),
      describe_stats("listings", &listings),
    ];
    for category in Category::ALL {
      if let Some(state) = self.client.category_state(category) {
        out.push(format!(
          "  {:<10} page {} x{} | {} of {} loaded | more: {} | fetched {}{} | epoch {}",
          category.to_string(),
          state.current_page_index,
          state.page_size,
          state.items.len(),
          state.total_count,
          state.has_more,
          state
            .last_fetch_at
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string()),
          if state.in_flight { " (loading)" } else { "" },
          state.epoch,
        ));
      }
    }
    out
  }

  fn describe_page(
    &self,
    result: CatalogResult<CacheResult<ListingPage>>,
    page: u32,
  ) -> Vec<String> {
    let result = match result {
      Ok(result) => result,
      Err(e) => return vec![describe_error(&e)],
    };

    let mut out = vec![format!(
      "{} page {} ({} of {}){}",
      self.category,
      page,
      result.data.items.len(),
      result.data.total_count,
      match (result.source, result.cached_at) {
        (CacheSource::Network, _) => String::new(),
        (CacheSource::Cache, Some(at)) => format!(" [cached {}]", at.format("%H:%M:%S")),
        (CacheSource::Cache, None) => " [cached]".to_string(),
        (CacheSource::Degraded, Some(at)) => {
          format!(" [offline, showing copy from {}]", at.format("%H:%M:%S"))
        }
        (CacheSource::Degraded, None) => " [offline, showing last copy]".to_string(),
        (CacheSource::Superseded, _) => " [outdated, filters changed]".to_string(),
      }
    )];
    out.extend(result.data.items.iter().map(describe_listing));
    if result.data.has_more {
      out.push("  ... 'more' for the next page".to_string());
    }
    out
  }

  fn describe_event(&self, event: DataEvent) -> String {
    match event {
      DataEvent::PageAppended { category, appended } => {
        let items = self.client.items(category);
        let mut line = format!("{}: +{} listings ({} loaded)", category, appended, items.len());
        for listing in items.iter().skip(items.len().saturating_sub(appended)) {
          line.push('\n');
          line.push_str(&describe_listing(listing));
        }
        line
      }
      DataEvent::LoadFailed { category, message } => {
        format!("{}: could not load more ({})", category, message)
      }
      DataEvent::CacheCleared { reason } => format!("Cache cleared: {}", reason),
    }
  }
}

async fn write_lines(stdout: &mut tokio::io::Stdout, lines: &[String]) -> Result<()> {
  for line in lines {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
  }
  Ok(())
}

fn describe_listing(listing: &Listing) -> String {
  let price = listing
    .price
    .map(|p| format!("{}", p))
    .unwrap_or_else(|| "-".to_string());
  format!(
    "  {:>8}  {:<40} {:>10}  {}",
    listing.id,
    listing.title,
    price,
    listing.city.as_deref().unwrap_or("")
  )
}

fn describe_listing_detail(listing: &Listing) -> Vec<String> {
  let tags: Vec<&str> = listing.category_tags.iter().map(String::as_str).collect();
  vec![
    format!("{} ({})", listing.title, listing.id),
    format!("  listed:   {}", listing.created_at.format("%Y-%m-%d %H:%M")),
    format!("  tags:     {}", tags.join(", ")),
    format!(
      "  price:    {}",
      listing.price.map(|p| p.to_string()).unwrap_or_default()
    ),
    format!(
      "  bedrooms: {}",
      listing.bedrooms.map(|b| b.to_string()).unwrap_or_default()
    ),
    format!("  city:     {}", listing.city.as_deref().unwrap_or("")),
  ]
}

fn describe_stats(name: &str, stats: &CacheStats) -> String {
  format!(
    "{:<9} {} items ({} valid, {} expired), {:.0}% full",
    name, stats.total_items, stats.valid_items, stats.expired_items, stats.fill_percentage
  )
}

fn describe_error(error: &CatalogError) -> String {
  match error {
    CatalogError::NotFound(id) => format!("Listing {} no longer exists.", id),
    CatalogError::Throttled => "Already loading, try again in a moment.".to_string(),
    other => format!("Error: {}", other),
  }
}
