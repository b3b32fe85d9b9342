use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tracing::info;

use pizza_restaurant_service::handlers::{router, AppState};
use pizza_restaurant_service::{establish_connection, run_migrations, DEFAULT_DATABASE_URL};

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL, global = true)]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations and serve the HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:5555")]
        bind: String,
    },
    /// Apply pending migrations and exit
    Migrate,
}

fn migrate(database_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let conn = &mut establish_connection(database_url)?;
    let applied = run_migrations(conn)?;
    info!("Applied {} migration(s) to {}", applied, database_url);
    Ok(())
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Serve { bind } => {
            migrate(&cli.database_url)?;

            let app = router(AppState::new(cli.database_url.as_str()));
            let listener = tokio::net::TcpListener::bind(bind).await?;
            info!("Pizza restaurant API listening on {}", listener.local_addr()?);

            axum::serve(listener, app).await?;
            Ok(())
        }
        Commands::Migrate => migrate(&cli.database_url),
    }
}
