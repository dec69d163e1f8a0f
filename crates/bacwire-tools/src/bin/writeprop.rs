use bacwire_core::services::WritePropertyRequest;
use bacwire_core::types::{DataValue, ObjectId};
use bacwire_tools::{LocalArgs, ObjectTypeArg, PropertyArg, TargetArgs};
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bacwire-writeprop")]
struct Args {
    #[command(flatten)]
    local: LocalArgs,
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long, value_enum, default_value_t = ObjectTypeArg::AnalogOutput)]
    object_type: ObjectTypeArg,
    #[arg(long)]
    object_instance: u32,
    #[arg(long, value_enum, default_value_t = PropertyArg::PresentValue)]
    property: PropertyArg,
    #[arg(long)]
    value: f32,
    #[arg(long)]
    priority: Option<u8>,
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

    let mut request = WritePropertyRequest::new(
        ObjectId::new(args.object_type.into_object_type(), args.object_instance),
        args.property.into_property_id(),
        DataValue::Real(args.value),
    );
    request.priority = args.priority;

    let outcome = transport.send(&device, request).wait().await;
    transport.terminate().await;
    if let Err(e) = outcome {
        eprintln!("write failed: {e}");
        std::process::exit(1);
    }
    println!("written");
    Ok(())
}
