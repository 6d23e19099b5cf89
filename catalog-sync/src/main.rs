use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog_store::{Analytics, CatalogStore, LanceCatalogStore, RankingQuery, SortSpec};
use catalog_sync::{
    HybridSearch, IngestionService, MessageHandler, ProductPayload, RetrievalRequest, Settings,
    UpsertEngine,
};

#[derive(Parser)]
#[command(name = "catalog-sync")]
#[command(about = "Catalog synchronization and hybrid product retrieval", long_about = None)]
struct Cli {
    /// Data directory (overrides CATALOG_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Environment file to load before reading settings
    #[arg(long)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume product change events until interrupted
    Consume,

    /// Declare the broker topology and exit
    Declare,

    /// Hybrid search over the catalog
    Search {
        /// Search query
        query: String,

        /// Category substring filter
        #[arg(short, long)]
        category: Option<String>,

        /// Re-order results (price_desc, price_asc, stock_desc, stock_asc)
        #[arg(short, long)]
        sort: Option<SortSpec>,

        /// Number of results
        #[arg(short, default_value = "5")]
        k: usize,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Quantitative queries over the catalog
    Analytics {
        #[command(subcommand)]
        action: AnalyticsAction,

        /// Category substring filter
        #[arg(short, long, global = true)]
        category: Option<String>,
    },

    /// Sync products from a JSON array file, skipping ones already present
    Backfill {
        /// File with an array of product payloads
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum AnalyticsAction {
    /// Number of products
    Count,

    /// Mean product price
    AveragePrice,

    /// Top products by price or stock
    Ranking {
        /// Sort key and direction
        #[arg(short, long, default_value = "price_desc")]
        sort: SortSpec,

        /// Maximum results to return
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.env_file {
        Some(path) => Settings::from_env_file(path)?,
        None => Settings::from_env()?,
    };
    if let Some(dir) = &cli.data_dir {
        settings.storage.data_dir = dir.clone();
    }
    Ok(settings)
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn CatalogStore>> {
    let store = LanceCatalogStore::open(
        &settings.storage.data_dir,
        settings.embedding.dimension,
        settings.storage.language,
    )
    .await
    .with_context(|| format!("Failed to open catalog store at {:?}", settings.storage.data_dir))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "catalog_sync=info,catalog_store=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Consume => {
            let store = open_store(&settings).await?;
            let embedder = settings.embedding.build_provider()?;
            let handler = MessageHandler::new(UpsertEngine::new(store, embedder));

            let handle = IngestionService::start(settings.broker.clone(), handler);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            println!("Shutting down, waiting for in-flight messages...");
            handle.stop().await;
        }

        Commands::Declare => {
            IngestionService::declare_topology(&settings.broker)
                .await
                .context("Failed to declare topology")?;
            println!(
                "Declared '{}' -> '{}' with dead letters in '{}'",
                settings.broker.exchange, settings.broker.queue, settings.broker.dead_letter_queue
            );
        }

        Commands::Search { ref query, ref category, sort, k, json } => {
            let store = open_store(&settings).await?;
            let embedder = settings.embedding.build_provider()?;
            let search = HybridSearch::new(store, embedder);

            let mut request = RetrievalRequest::new(query.clone()).with_k(k);
            if let Some(category) = category {
                request = request.with_category(category.clone());
            }
            if let Some(sort) = sort {
                request = request.with_sort(sort);
            }

            let results = search.search(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No products found for: {}", query);
            } else {
                println!("Found {} products:\n", results.len());
                for (i, product) in results.iter().enumerate() {
                    println!(
                        "{}. [{}] R$ {:.2} | stock {}",
                        i + 1,
                        product.metadata.category,
                        product.metadata.price,
                        product.metadata.stock
                    );
                    println!("   {}", product.content);
                }
            }
        }

        Commands::Analytics { ref action, ref category } => {
            let analytics = Analytics::new(open_store(&settings).await?);
            let category = category.as_deref();

            match action {
                AnalyticsAction::Count => {
                    println!("{}", analytics.count(category).await?);
                }
                AnalyticsAction::AveragePrice => match analytics.average_price(category).await? {
                    Some(avg) => println!("{:.2}", avg),
                    None => println!("No products"),
                },
                AnalyticsAction::Ranking { sort, limit } => {
                    let mut query = RankingQuery::new(*sort).with_limit(*limit);
                    if let Some(category) = category {
                        query = query.with_category(category);
                    }
                    for (i, record) in analytics.ranking(&query).await?.iter().enumerate() {
                        println!(
                            "{}. #{} R$ {:.2} | stock {} | {}",
                            i + 1,
                            record.product_id,
                            record.metadata.price,
                            record.metadata.stock,
                            record.content
                        );
                    }
                }
            }
        }

        Commands::Backfill { ref file } => {
            let raw = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let payloads: Vec<ProductPayload> =
                serde_json::from_str(&raw).context("Backfill file must be a JSON array of products")?;

            let store = open_store(&settings).await?;
            let embedder = settings.embedding.build_provider()?;
            let engine = UpsertEngine::new(store, embedder);

            let report = engine.backfill(payloads).await;
            println!("Inserted:        {}", report.inserted);
            println!("Already present: {}", report.already_present);
            println!("Invalid:         {}", report.invalid);
            println!("Failed:          {}", report.failed);
        }
    }

    Ok(())
}
