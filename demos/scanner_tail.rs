//! Tail a scanner table from the live feed and print every connection event.
//!
//! ```sh
//! SCANNER_FEED_URL=wss://feed.example.com/ws \
//! SCANNER_PAIRS=0xabc,0xdef \
//! RUST_LOG=scanner_feed=debug \
//! cargo run --example scanner_tail
//! ```

use std::env;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

use scanner_feed::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = env::var("SCANNER_FEED_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    let table = TableType::from(env::var("SCANNER_TABLE").unwrap_or_else(|_| "trending".into()).as_str());
    let pairs: Vec<PairAddress> = env::var("SCANNER_PAIRS")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| PairAddress::from(s.trim()))
        .collect();

    // Seed the table the way an app would after its REST fetch.
    let store = Arc::new(Mutex::new(TableStore::new()));
    if let Ok(mut guard) = store.lock() {
        guard.replace_table(table.clone(), pairs.iter().cloned().map(PairRow::new).collect());
    }

    let config = FeedConfig {
        ws: WsConfig::with_url(url),
        ..FeedConfig::default()
    };
    let mut pipeline = FeedPipeline::start(config, Arc::clone(&store)).await?;
    pipeline
        .set_scanner_filter(table.clone(), ScannerFilterParams::default())
        .await?;
    pipeline.update_visible_tokens(pairs).await?;

    {
        let events = pipeline.events();
        tokio::pin!(events);
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(WsEvent::Message(Kind::Tick(tick))) => {
                        println!("tick  {} {}", tick.pair_address, tick.price_usd);
                    }
                    Some(WsEvent::Message(msg)) => println!("{:<5} {:?}", msg.name(), msg.pair()),
                    Some(WsEvent::Connected) => println!("connected"),
                    Some(WsEvent::Disconnected { code, reason }) => {
                        println!("disconnected code={:?} reason={}", code, reason);
                    }
                    Some(WsEvent::Error(e)) => println!("error {}", e),
                    Some(WsEvent::MaxReconnectReached) => {
                        println!("giving up");
                        break;
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    let stats = pipeline.subscription_stats().await?;
    println!(
        "subscriptions: {} total, {} subscribed, {} pending, {} failed",
        stats.total, stats.subscribed, stats.pending, stats.error
    );
    if let Ok(guard) = store.lock() {
        for row in guard.rows(&table) {
            println!("{} price={:?} mcap={:?}", row.pair, row.price, row.market_cap);
        }
    }

    pipeline.stop().await?;
    Ok(())
}
