//! CLI for logcast
//!
//! Subcommands:
//! - `serve`: run the WebSocket gateway
//! - `console`: interactive session for one user on stdin/stdout
//! - `migrate`: forward stored history to the exchange

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tracing::{error, info};

use logcast::broker::{self, Broker, DistributedBroker};
use logcast::config::{Settings, load_config};
use logcast::exchange;
use logcast::persistence::{self, LogStore, SubscriptionBook};
use logcast::session::Session;
use logcast::transport::websocket::start_websocket_server;
use logcast::utils::{Result, logging};

#[derive(Parser)]
#[command(name = "logcast", about = "Topic pub/sub broker with durable logs")]
enum Command {
    /// Start the WebSocket gateway
    Serve,
    /// Run an interactive session
    Console {
        /// User to log in as
        #[arg(long)]
        user: String,
    },
    /// Route every stored message to the exchange again
    Migrate,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(2);
        }
    };
    logging::init(&settings.logging.level);

    let outcome = match cmd {
        Command::Serve => run_server(settings).await,
        Command::Console { user } => tokio::task::spawn_blocking(move || run_console(settings, &user))
            .await
            .unwrap_or_else(|e| {
                error!("console task failed: {e}");
                Ok(())
            }),
        Command::Migrate => run_migrate(settings),
    };

    if let Err(e) = outcome {
        error!("{e}");
        std::process::exit(1);
    }
}

fn open_broker(settings: &Settings) -> Result<(Arc<dyn LogStore>, Arc<dyn Broker>)> {
    let store = persistence::open_store(&settings.storage)?;
    let connector = exchange::connector(&settings.exchange)?;
    let broker = broker::open(settings, store.clone(), connector)?;
    Ok((store, broker))
}

async fn run_server(settings: Settings) -> Result<()> {
    let (_, broker) = open_broker(&settings)?;
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    tokio::select! {
        outcome = start_websocket_server(&addr, broker) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    }
}

fn run_migrate(settings: Settings) -> Result<()> {
    let store = persistence::open_store(&settings.storage)?;
    let connector = exchange::connector(&settings.exchange)?;
    let broker = DistributedBroker::new(store, connector, &settings.exchange.name)?;
    let forwarded = broker.replay_history_to_exchange()?;
    println!(
        "Forwarded {forwarded} messages to exchange '{}'",
        settings.exchange.name
    );
    Ok(())
}

const HELP: &str = "commands:
  pub <topic> <message>   publish a message
  sub <topic> [filter]    subscribe, optionally filtered by keyword
  unsub <topic>           unsubscribe
  topics                  list known topics
  search <keyword>        topics whose history mentions keyword
  subs                    list your subscriptions
  login <user>            switch user
  quit";

fn run_console(settings: Settings, user: &str) -> Result<()> {
    let (store, broker) = open_broker(&settings)?;
    let book = SubscriptionBook::new(store);

    let (output, lines) = crossbeam_channel::unbounded::<String>();
    let printer = thread::spawn(move || {
        for line in lines {
            println!("{line}");
        }
    });

    let mut session = Some(Session::login(broker.clone(), book.clone(), user, output.clone())?);
    println!("{HELP}");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let Some(current) = session.as_mut() else {
            break;
        };
        let (command, rest) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
        let rest = rest.trim();

        let result = match command {
            "" => Ok(()),
            "pub" => {
                let (topic, content) = rest.split_once(' ').unwrap_or((rest, ""));
                current.publish(topic, content)
            }
            "sub" => {
                let (topic, filter) = rest.split_once(' ').unwrap_or((rest, ""));
                current.subscribe(topic, Some(filter))
            }
            "unsub" => current.unsubscribe(rest).map(|found| {
                if !found {
                    println!("not subscribed to '{rest}'");
                }
            }),
            "topics" => {
                println!("{}", current.topics().join("\n"));
                Ok(())
            }
            "search" => current.search(rest).map(|found| println!("{}", found.join("\n"))),
            "subs" => {
                println!("{}", current.subscribed_topics().join("\n"));
                Ok(())
            }
            "login" => match session.take() {
                Some(previous) => previous.logout().and_then(|_| {
                    session = Some(Session::login(
                        broker.clone(),
                        book.clone(),
                        rest,
                        output.clone(),
                    )?);
                    Ok(())
                }),
                None => Ok(()),
            },
            "quit" | "exit" => break,
            _ => {
                println!("{HELP}");
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("error: {e}");
        }
        let _ = io::stdout().flush();
    }

    if let Some(current) = session.take() {
        current.logout()?;
    }
    drop(output);
    drop(broker);
    let _ = printer.join();
    Ok(())
}
