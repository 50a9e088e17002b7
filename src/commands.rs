/// Available commands and autocomplete logic

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "browse",
    aliases: &["b", "ls", "list"],
    usage: "browse [all|sale|rent|new-builds]",
    description: "Show the first page of a category",
  },
  Command {
    name: "more",
    aliases: &["m", "next"],
    usage: "more",
    description: "Load the next page of the current category",
  },
  Command {
    name: "page",
    aliases: &["p", "goto"],
    usage: "page <n>",
    description: "Show a single page without merging it into the feed",
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    usage: "refresh",
    description: "Refetch the first page, ignoring the refetch interval",
  },
  Command {
    name: "filter",
    aliases: &["f", "where"],
    usage: "filter [key=value ...|none]",
    description: "Filter the current category (min_price, max_price, min_bedrooms, city)",
  },
  Command {
    name: "show",
    aliases: &["s", "view"],
    usage: "show <id>",
    description: "Show a single listing",
  },
  Command {
    name: "invalidate",
    aliases: &["i", "dirty"],
    usage: "invalidate",
    description: "Force every category to refetch on next read",
  },
  Command {
    name: "stats",
    aliases: &["st", "cache"],
    usage: "stats",
    description: "Cache and pagination diagnostics",
  },
  Command {
    name: "clear",
    aliases: &["wipe"],
    usage: "clear [now]",
    description: "Wipe all cached data now, or schedule it for next start",
  },
  Command {
    name: "restart",
    aliases: &["reboot"],
    usage: "restart",
    description: "Wipe all cached data and restart",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit roost",
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Split an input line into the best matching command and its arguments.
///
/// Only exact and prefix matches resolve; a fuzzy hit is too surprising to
/// execute.
pub fn resolve(line: &str) -> Option<(&'static Command, Vec<&str>)> {
  let mut words = line.split_whitespace();
  let head = words.next()?.to_lowercase();

  let cmd = get_suggestions(&head).into_iter().next().filter(|cmd| {
    cmd.name.starts_with(&head) || cmd.aliases.iter().any(|a| a.starts_with(&head))
  })?;

  Some((cmd, words.collect()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("browse");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "browse");
  }

  #[test]
  fn test_alias_match() {
    let suggestions = get_suggestions("s");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "show");
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("ref");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "refresh");
  }

  #[test]
  fn test_fuzzy_match() {
    let suggestions = get_suggestions("fres");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "refresh");
  }

  #[test]
  fn test_resolve_splits_arguments() {
    let (cmd, args) = resolve("  Filter min_price=100000 city=Lisbon ").unwrap();
    assert_eq!(cmd.name, "filter");
    assert_eq!(args, vec!["min_price=100000", "city=Lisbon"]);
  }

  #[test]
  fn test_resolve_rejects_fuzzy_and_empty() {
    assert!(resolve("fres").is_none());
    assert!(resolve("   ").is_none());
    assert!(resolve("zzz").is_none());
  }
}
