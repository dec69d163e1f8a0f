use bacwire_core::services::ReadPropertyRequest;
use bacwire_core::types::ObjectId;
use bacwire_tools::{LocalArgs, ObjectTypeArg, PropertyArg, TargetArgs};
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bacwire-readprop")]
struct Args {
    #[command(flatten)]
    local: LocalArgs,
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long, value_enum, default_value_t = ObjectTypeArg::Device)]
    object_type: ObjectTypeArg,
    /// Object instance; defaults to the device instance.
    #[arg(long)]
    object_instance: Option<u32>,
    #[arg(long, value_enum, default_value_t = PropertyArg::ObjectName)]
    property: PropertyArg,
    #[arg(long)]
    index: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let transport = args.local.start().await?;
    let Some(device) = args
        .target
        .resolve(&transport, Duration::from_secs(args.local.timeout_secs))
        .await?
    else {
        eprintln!("device {} did not answer", args.target.device);
        std::process::exit(1);
    };

    let object_id = ObjectId::new(
        args.object_type.into_object_type(),
        args.object_instance.unwrap_or(args.target.device),
    );
    let mut request = ReadPropertyRequest::new(object_id, args.property.into_property_id());
    request.array_index = args.index;

    let outcome = transport.send(&device, request).wait().await;
    transport.terminate().await;
    match outcome.map(|ack| ack.into_read_property()) {
        Ok(Some(ack)) => println!("{:?}", ack.value),
        Ok(None) => println!("unexpected acknowledgement"),
        Err(e) => {
            eprintln!("read failed: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
