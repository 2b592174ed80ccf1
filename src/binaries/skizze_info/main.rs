use clap::Parser;
use serde::Deserialize;
use serde::Serialize;
use skizze_storage::{InfoStore, MetadataStore};
use skizze_utils::time::{time_format, unix_secs_to_time};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Parser)]
#[clap(about, version, author)]
struct Config {
    /// directory of the domain metadata store
    #[clap(long)]
    pub path: String,
}

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    println!("config: {:?}", config);
    if config.path.is_empty() {
        println!("path MUST not be empty!");
        return Ok(());
    }

    let path = skizze_server::config::expand_home(&config.path);
    let store = InfoStore::open(path)?;
    println!("info store: {}", store.path().display());

    let infos = store.get_all_info()?;
    for (i, (name, info)) in infos.iter().enumerate() {
        let created = unix_secs_to_time(info.created_at)
            .map(time_format)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:06}> {} type: {}, capacity: {}, created: {}",
            i, name, info.sketch_type, info.capacity, created
        );
    }
    println!("{} domains", infos.len());

    Ok(())
}
