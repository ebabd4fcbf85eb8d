use super::hotel;
use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use occtx::{Client, ConnectionConfig, Outcome};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str =
    "occtx://localhost/hotel?max_connections=8&acquire_timeout_ms=2000&lock_timeout_ms=500";

#[derive(Debug, Parser)]
#[command(name = "occtx", version, about = "Optimistic check-in against a pooled database")]
pub struct App {
    /// Connection string for the pool
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,

    /// Log every state transition
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a guest in: assign a room and bill the stay
    Checkin {
        #[arg(long, default_value_t = 43)]
        reservation: i64,
        #[arg(long, default_value_t = 309)]
        room: i64,
        #[arg(long, default_value_t = 120.0)]
        amount: f64,
        /// Let another desk assign room 310 first
        #[arg(long)]
        stale: bool,
    },
    /// Submit the same check-in from many tasks at once
    Race {
        #[arg(long, default_value_t = 8)]
        tasks: usize,
        #[arg(long, default_value_t = 43)]
        reservation: i64,
    },
}

impl App {
    pub fn new() -> Self {
        Self::parse()
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.init_tracing();

        let config = ConnectionConfig::from_url(&self.url)
            .with_context(|| format!("invalid connection string '{}'", self.url))?;
        let client = Client::connect(config)?;
        hotel::create_schema(&client)?;

        match self.command {
            Command::Checkin {
                reservation,
                room,
                amount,
                stale,
            } => checkin(&client, reservation, room, amount, stale).await?,
            Command::Race { tasks, reservation } => race(&client, tasks, reservation).await?,
        }

        eprintln!("{}", client.stats());
        Ok(())
    }

    fn init_tracing(&self) {
        let filter = if self.verbose {
            EnvFilter::new("occtx=debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("occtx=warn"))
        };
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn checkin(
    client: &Client,
    reservation: i64,
    room: i64,
    amount: f64,
    stale: bool,
) -> anyhow::Result<()> {
    hotel::seed(client, reservation, "Ada Lovelace").await?;
    if stale {
        client
            .query(
                "UPDATE reservations SET room_no = 310 WHERE id = $1",
                &[reservation.into()],
            )
            .await?;
    }

    let response = client.submit(&hotel::checkin(reservation, room, amount)).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    client.query("SELECT * FROM reservations", &[]).await?.print();
    client.query("SELECT * FROM invoices", &[]).await?.print();
    Ok(())
}

async fn race(client: &Client, tasks: usize, reservation: i64) -> anyhow::Result<()> {
    hotel::seed(client, reservation, "Grace Hopper").await?;

    let submissions = (0..tasks).map(|i| {
        let client = client.clone();
        let request = hotel::checkin(reservation, 300 + i as i64, 120.0);
        tokio::spawn(async move { client.submit(&request).await })
    });

    let (mut applied, mut conflicted, mut failed) = (0, 0, 0);
    for joined in join_all(submissions).await {
        match joined?.outcome {
            Outcome::Applied => applied += 1,
            Outcome::Conflicted => conflicted += 1,
            Outcome::Failed => failed += 1,
        }
    }

    println!("applied: {applied}, conflicted: {conflicted}, failed: {failed}");
    client.query("SELECT * FROM reservations", &[]).await?.print();
    client.query("SELECT * FROM invoices", &[]).await?.print();
    Ok(())
}
