use chrono::Local;
use volspike_market::{AggregatorConfig, MarketAggregator, MarketSnapshot, Tier};

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    let tier = std::env::args()
        .nth(1)
        .map(|name| Tier::from_name(&name))
        .unwrap_or_default();
    let config = AggregatorConfig::from_env().with_tier(tier);

    println!("\n════════════════════════════════════════════════════════════");
    println!("📈 VOLSPIKE LIVE MARKET TABLE");
    println!("════════════════════════════════════════════════════════════");
    println!("📡 Stream: {}", config.stream_url);
    println!("🔗 API:    {}", config.api_base());
    println!("🎫 Tier:   {}", config.tier.as_str());
    println!("⏰ Time:   {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("════════════════════════════════════════════════════════════\n");

    let mut handle = MarketAggregator::new(config).start();
    let mut publications: u64 = 0;

    loop {
        tokio::select! {
            snapshot = handle.recv() => match snapshot {
                Some(snapshot) => {
                    publications += 1;
                    print_snapshot(&snapshot, publications, handle.status().as_str());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n👋 Shutting down...");
                break;
            }
        }
    }

    handle.stop().await;
}

fn print_snapshot(snapshot: &MarketSnapshot, publications: u64, status: &str) {
    println!(
        "📊 #{publications} | {status} | {} symbols | updated {}",
        snapshot.len(),
        snapshot.updated_at.format("%H:%M:%S%.3f")
    );
    if let Some(as_of) = snapshot.open_interest_as_of {
        println!("   open interest as of {}", as_of.format("%H:%M:%S"));
    }
    println!(
        "   {:<4} {:<12} {:>14} {:>9} {:>10} {:>10} {:>10}",
        "#", "SYMBOL", "PRICE", "24H%", "FUNDING", "OPEN INT", "VOLUME"
    );
    for (rank, entry) in snapshot.entries.iter().take(10).enumerate() {
        println!(
            "   {:<4} {:<12} {:>14} {:>9} {:>10} {:>10} {:>10}",
            rank + 1,
            entry.symbol,
            format!("${:.prec$}", entry.price, prec = entry.precision as usize),
            entry
                .change_24h
                .map(|change| format!("{change:+.2}%"))
                .unwrap_or_else(|| "-".to_string()),
            format!("{:+.4}%", entry.funding_rate * 100.0),
            format_notional(entry.open_interest),
            format_notional(entry.volume_24h),
        );
    }
    println!();
}

fn format_notional(value: f64) -> String {
    if value <= 0.0 {
        "-".to_string()
    } else if value >= 1_000_000_000.0 {
        format!("${:.2}B", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("${:.1}M", value / 1_000_000.0)
    } else {
        format!("${:.0}K", value / 1_000.0)
    }
}

// Initialise an INFO `Subscriber` for `Tracing` logs
fn init_logging() {
    tracing_subscriber::fmt()
        // Filter messages based on the INFO level
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Use colored output in debug mode
        .with_ansi(cfg!(debug_assertions))
        // Install this Tracing subscriber as global default
        .init()
}
