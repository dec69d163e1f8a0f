use bacwire_core::services::WhoIsRequest;
use bacwire_tools::LocalArgs;
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bacwire-whois")]
struct Args {
    #[command(flatten)]
    local: LocalArgs,
    /// Lowest instance to ask for; needs `--high`.
    #[arg(long, requires = "high")]
    low: Option<u32>,
    #[arg(long, requires = "low")]
    high: Option<u32>,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let transport = args.local.start().await?;
    let who_is = match (args.low, args.high) {
        (Some(low), Some(high)) => WhoIsRequest::range(low, high),
        _ => WhoIsRequest::global(),
    };
    let devices = transport
        .discover(who_is, Duration::from_secs(args.local.timeout_secs))
        .await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        for device in &devices {
            println!(
                "{:>8}  {}  max-apdu={:?} segmentation={:?} vendor={:?}",
                device.instance(),
                device.address(),
                device.max_apdu_length_accepted(),
                device.segmentation_supported(),
                device.vendor_id(),
            );
        }
    }
    transport.terminate().await;
    Ok(())
}
