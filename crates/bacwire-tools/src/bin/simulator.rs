use bacwire_core::types::{ObjectId, ObjectType, PropertyId};
use bacwire_tools::LocalArgs;
use bacwire_transport::store::analog_value_properties;
use bacwire_transport::ObjectStore;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "bacwire-simulator")]
struct Args {
    #[command(flatten)]
    local: LocalArgs,
    /// Number of analog-value objects to create.
    #[arg(long, default_value_t = 3)]
    analog_values: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let mut args = Args::parse();
    if args.local.bind.port() == 0 {
        args.local.bind.set_port(bacwire_datalink::DataLinkAddress::BACNET_IP_DEFAULT_PORT);
    }
    let config = args.local.config();
    let store = Arc::new(ObjectStore::new(&config));
    for i in 0..args.analog_values {
        let mut properties = analog_value_properties(0.0);
        properties.push((PropertyId::ObjectName, format!("AV-{i}").as_str().into()));
        store.add_object(ObjectId::new(ObjectType::AnalogValue, i), properties);
    }

    let transport = args.local.start_with_handler(config, store).await?;
    transport.i_am().await?;
    println!(
        "Simulated device {} running ({} AV). Ctrl+C to stop.",
        args.local.local_instance, args.analog_values
    );
    tokio::signal::ctrl_c().await?;
    transport.terminate().await;
    Ok(())
}
