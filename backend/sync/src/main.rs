use clap::Parser;
use models::Provider;

#[derive(Parser, Debug)]
#[command(author, version, about = "Import activities for every connected account")]
struct Args {
    /// SQLite file, defaults to DATABASE_PATH
    #[arg(long)]
    database: Option<String>,

    /// Re-import this many days back instead of resuming from the last sync
    #[arg(long)]
    days: Option<u32>,

    /// Only sync one provider
    #[arg(long)]
    provider: Option<Provider>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let totals = sync::sync_all(args.database, args.provider, args.days).await?;

    println!("Connections: {}", totals.connections);
    println!("Imported Activities: {}", totals.imported);
    println!("Failed: {}", totals.failed);

    Ok(())
}
