use barkeep::config::Config;
use barkeep::keys::DrinkQueryKey;
use barkeep::persist::{
  CacheRestorer, DurableStore, NoopStore, PersistenceOptions, RestoreOutcome, Snapshot,
  SnapshotHeader, SnapshotSlot,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "barkeep")]
#[command(about = "Inspect and manage the Barkeeply offline query cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/barkeep/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Append logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
  /// Print the persisted snapshot's header and keys
  Inspect,
  /// Report whether the next launch would restore the snapshot (changes nothing)
  Check,
  /// Delete the persisted snapshot
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = barkeep::logging::init(args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let options = config.persistence_options();
  let mut out = std::io::stdout().lock();

  if config.persistence.enabled {
    let slot = SnapshotSlot::new(Arc::new(config.open_store()?), options.storage_key.clone());
    run(args.command, &slot, &options, Utc::now(), &mut out)
  } else {
    tracing::info!("Persistence is disabled; the cache lives in memory only");
    let slot = SnapshotSlot::new(Arc::new(NoopStore), options.storage_key.clone());
    run(args.command, &slot, &options, Utc::now(), &mut out)
  }
}

fn run<S: DurableStore, W: Write>(
  command: Command,
  slot: &SnapshotSlot<S>,
  options: &PersistenceOptions,
  now: DateTime<Utc>,
  out: &mut W,
) -> Result<()> {
  match command {
    Command::Inspect => inspect(slot, now, out)?,
    Command::Check => {
      let restorer = CacheRestorer::new(slot.clone(), options);
      match restorer.check_at(now) {
        RestoreOutcome::Restored { entries } => {
          writeln!(out, "would restore {} cached queries", entries)?
        }
        RestoreOutcome::Expired { age } => writeln!(
          out,
          "cached snapshot expired ({}h old), the next launch clears it",
          age.num_hours()
        )?,
        outcome => writeln!(out, "{}", outcome)?,
      }
    }
    Command::Clear => {
      slot.clear()?;
      writeln!(out, "Cleared {}", slot.key())?;
    }
  }

  Ok(())
}

fn inspect<S: DurableStore, W: Write>(
  slot: &SnapshotSlot<S>,
  now: DateTime<Utc>,
  out: &mut W,
) -> Result<()> {
  let Some(text) = slot.read()? else {
    writeln!(out, "No snapshot under {}", slot.key())?;
    return Ok(());
  };

  let header = SnapshotHeader::decode(&text)?;
  writeln!(out, "Key:      {}", slot.key())?;
  writeln!(out, "Version:  {}", header.version)?;
  writeln!(
    out,
    "Written:  {} ({}s ago)",
    header.timestamp.to_rfc3339(),
    (now - header.timestamp).num_seconds()
  )?;
  writeln!(out, "Size:     {} bytes", text.len())?;

  let snapshot = Snapshot::decode(&text)?;
  writeln!(out, "Queries:  {}", snapshot.queries.len())?;
  for query in &snapshot.queries {
    let label = match DrinkQueryKey::from_key(&query.query_key) {
      Some(known) => known.description(),
      None => query.query_key.to_string(),
    };
    let hash = query.query_key.fingerprint();
    writeln!(
      out,
      "  {}  {}  {}",
      &hash[..12],
      query.data_updated_at.to_rfc3339(),
      label
    )?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use barkeep::cache::{CacheValue, QueryCache, QueryKey};
  use barkeep::persist::MemoryStore;
  use chrono::Duration;

  fn slot_with_snapshot(written_at: DateTime<Utc>) -> (Arc<MemoryStore>, SnapshotSlot<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let slot = SnapshotSlot::new(Arc::clone(&store), "BARKEEPLY_QUERY_CACHE");

    let cache = QueryCache::new();
    cache.set_query_data(
      &QueryKey::from(["drinks", "list", "user-1"]),
      CacheValue::from(3i64),
      written_at,
    );
    cache.set_query_data(&QueryKey::from(["settings"]), CacheValue::Null, written_at);
    slot
      .write(&Snapshot::capture(&cache, "v1", written_at).encode().unwrap())
      .unwrap();
    (store, slot)
  }

  fn output(command: Command, slot: &SnapshotSlot<MemoryStore>, now: DateTime<Utc>) -> String {
    let mut out = Vec::new();
    run(command, slot, &PersistenceOptions::default(), now, &mut out).unwrap();
    String::from_utf8(out).unwrap()
  }

  #[test]
  fn test_inspect_describes_known_keys() {
    let now = Utc::now();
    let (_store, slot) = slot_with_snapshot(now);

    let text = output(Command::Inspect, &slot, now);
    let fingerprint = QueryKey::from(["drinks", "list", "user-1"]).fingerprint();
    assert!(text.contains("Queries:  2"));
    assert!(text.contains("drinks of user-1"));
    assert!(text.contains(&fingerprint[..12]));
    assert!(text.contains(r#"["settings"]"#));
  }

  #[test]
  fn test_check_does_not_clear_expired_snapshot() {
    let now = Utc::now();
    let (store, slot) = slot_with_snapshot(now - Duration::hours(30));

    let text = output(Command::Check, &slot, now);
    assert!(text.contains("expired (30h old)"));
    assert!(store.get("BARKEEPLY_QUERY_CACHE").unwrap().is_some());
  }

  #[test]
  fn test_check_counts_restorable_entries() {
    let now = Utc::now();
    let (_store, slot) = slot_with_snapshot(now - Duration::minutes(5));
    assert_eq!(output(Command::Check, &slot, now), "would restore 2 cached queries\n");
  }

  #[test]
  fn test_disabled_persistence_has_nothing_stored() {
    let slot = SnapshotSlot::new(Arc::new(NoopStore), "BARKEEPLY_QUERY_CACHE");
    let mut out = Vec::new();
    run(
      Command::Inspect,
      &slot,
      &PersistenceOptions::default(),
      Utc::now(),
      &mut out,
    )
    .unwrap();
    assert_eq!(
      String::from_utf8(out).unwrap(),
      "No snapshot under BARKEEPLY_QUERY_CACHE\n"
    );
  }
}
