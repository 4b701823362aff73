#![cfg(not(tarpaulin_include))]

use recydash::accounts::UserDirectory;
use recydash::config::DashboardConfig;
use recydash::i18n::LocalizationResolver;
use recydash::object_storage::DirectoryStorage;
use recydash::persistence::{FileStore, PersistenceBridge};
use recydash::preferences::Preferences;
use recydash::snapshot::Snapshot;
use recydash::store::{BucketKind, DocumentLibrary, FacilityStore};
use std::env;
use std::path::Path;
use std::sync::Arc;

const USAGE: &str = "Usage: recydash [--config <file>] <command>

Commands:
  seed                                   Create the stores, seeding empty ones
  list [lang]                            Facilities with derived status
  map                                    Facilities that can be placed on the map
  docs                                   Documents by bucket
  uploads                                Upload audit log
  export <file>                          Write a compressed snapshot
  import <file>                          Replace stored data with a snapshot
  translate <lang> <key>                 Resolve a translation key
  register <username> <email> <password> Add a local account";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config_file = match args.iter().position(|a| a == "--config") {
        Some(pos) if pos + 1 < args.len() => {
            let file = args.remove(pos + 1);
            args.remove(pos);
            Some(file)
        }
        Some(_) => {
            eprintln!("{}", USAGE);
            return Ok(());
        }
        None => None,
    };
    let config = DashboardConfig::load(config_file.as_deref().map(Path::new))?;

    let kv = Arc::new(FileStore::open(&config.data_dir)?);
    let resolver = LocalizationResolver::bundled_with_default(&config.default_language);
    let open_facilities = || FacilityStore::open(PersistenceBridge::new(Arc::clone(&kv)));
    let open_documents = || {
        let storage = DirectoryStorage::new(&config.object_dir, &config.public_base_url);
        DocumentLibrary::open(PersistenceBridge::new(Arc::clone(&kv)), Some(storage))
    };

    let command: Vec<&str> = args.iter().map(String::as_str).collect();
    match command.as_slice() {
        ["seed"] => {
            let facilities = open_facilities();
            let documents = open_documents();
            println!(
                "{} facilities, {} documents in {}",
                facilities.len(),
                documents.list().len(),
                config.data_dir.display()
            );
        }
        ["list", rest @ ..] => {
            let lang = match rest.first() {
                Some(lang) => lang.to_string(),
                None => Preferences::new(PersistenceBridge::new(Arc::clone(&kv))).language(&resolver),
            };
            for view in open_facilities().views(&resolver, &lang) {
                println!(
                    "{:>4}  {:<40} {:<14} {}",
                    view.id,
                    view.name,
                    view.label,
                    view.location.unwrap_or_default()
                );
            }
        }
        ["map"] => {
            let facilities = open_facilities();
            for entity in facilities.map_entries() {
                let view = recydash::derive::present(entity, &resolver, resolver.default_language());
                if let Some((lat, lng)) = view.coordinates {
                    println!(
                        "{:>4}  {:>9.4} {:>9.4}  {:<10} {}",
                        view.id,
                        lat,
                        lng,
                        view.color.as_str(),
                        view.name
                    );
                }
            }
        }
        ["docs"] => {
            let facilities = open_facilities().list();
            let documents = open_documents();
            for bucket in documents.buckets(&facilities) {
                let heading = match &bucket.kind {
                    BucketKind::General => "general".to_string(),
                    BucketKind::Facility(id) => format!("facility {}", id),
                    BucketKind::UnknownGroup(key) => format!("unknown facility {}", key),
                };
                println!("{} ({})", heading, bucket.documents.len());
                for doc in bucket.documents {
                    println!("  {}  {}", doc.id, doc.text("title").unwrap_or_default());
                }
            }
        }
        ["uploads"] => {
            let bridge = PersistenceBridge::new(Arc::clone(&kv));
            for record in bridge.upload_log()? {
                let note = if record.ephemeral { " (local only)" } else { "" };
                println!(
                    "{}  {}  {}{}",
                    record.uploaded_at, record.title, record.reference, note
                );
            }
        }
        ["export", file] => {
            let snapshot = Snapshot::export(&PersistenceBridge::new(Arc::clone(&kv)))?;
            snapshot.write_to(file)?;
            println!("snapshot written to {}", file);
        }
        ["import", file] => {
            let snapshot = Snapshot::read_from(file)?;
            let mut facilities = open_facilities();
            let mut documents = open_documents();
            snapshot.restore_into(&mut facilities, &mut documents)?;
            println!(
                "restored {} facilities and {} documents",
                facilities.len(),
                documents.list().len()
            );
        }
        ["translate", lang, key] => {
            println!("{}", resolver.resolve(lang, key));
        }
        ["register", username, email, password] => {
            let users = UserDirectory::open(&config.data_dir)?;
            users.register(username, email, password)?;
            println!("user {} registered", username);
        }
        _ => eprintln!("{}", USAGE),
    }

    Ok(())
}
