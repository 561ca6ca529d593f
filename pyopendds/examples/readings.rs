use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pyopendds::dds::{DdsDuration, DdsProvider, StatusKind};
use pyopendds::host::Host;
use pyopendds::host::memory::MemoryHost;
use pyopendds::loopback::LoopbackProvider;
use pyopendds::{Bridge, Builder, InitOptions, Result, impl_idl_struct};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Reading {
    value: i32,
    r#where: String,
}

impl_idl_struct!(Reading, "Test::Reading", module = "basic", class = "Reading", {
    value,
    r#where => "where",
});

#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long, default_value = "42")]
    domain: u32,
    #[arg(short, long, default_value = "5")]
    count: i64,
    #[arg(long)]
    debug_level: Option<i64>,
    /// Seconds to wait for the reader to match.
    #[arg(short, long, default_value = "1.0")]
    timeout: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let host = MemoryHost::new();
    let basic = host.add_module("basic");
    host.new_class(&basic, "Reading", &[]);
    let proxies = host.add_module("pyopendds");
    let proxy = |name: &str| -> Result<_> {
        let class = host.new_class(&proxies, name, &[]);
        Ok(host.call(&class, &[])?)
    };

    let provider = Arc::new(LoopbackProvider::builder().build()?);
    let bridge = Bridge::builder(host.clone())
        .with_provider(provider.clone() as Arc<dyn DdsProvider>)
        .build()?;
    let reading_class = bridge.register_topic_type::<Reading>()?;

    let mut options = InitOptions::default();
    if let Some(level) = args.debug_level {
        options = options.with_debug_level(level);
    }
    bridge.init(&options)?;

    let participant = proxy("DomainParticipant")?;
    bridge.create_participant(&participant, args.domain)?;
    bridge.register_type(&participant, &reading_class)?;
    let topic = proxy("Topic")?;
    bridge.create_topic(&topic, &participant, "Readings", "Test::Reading")?;

    let publisher = proxy("Publisher")?;
    bridge.create_publisher(&publisher, &participant)?;
    let writer = proxy("DataWriter")?;
    bridge.create_datawriter(&writer, &publisher, &topic, None)?;

    let subscriber = proxy("Subscriber")?;
    bridge.create_subscriber(&subscriber, &participant)?;
    let reader = proxy("DataReader")?;
    bridge.create_datareader(&reader, &subscriber, &topic, None)?;

    let timeout = DdsDuration::from_secs_f64(args.timeout)?;
    bridge.wait_for(&writer, StatusKind::PublicationMatched.into(), timeout)?;
    info!("writer matched on domain {}", args.domain);

    for n in 0..args.count {
        let sample = host.call(&reading_class, &[])?;
        host.set_attr(&sample, "value", host.new_i64(n * 10))?;
        host.set_attr(&sample, "where", host.new_str("dock"))?;
        bridge.write(&writer, &sample)?;

        bridge.wait_for(&reader, StatusKind::DataAvailable.into(), Duration::from_secs(1).into())?;
        let taken = bridge.take_next_sample(&reader)?;
        let value = host.as_i64(&host.get_attr(&taken, "value")?)?;
        let place = host.str_of(&host.get_attr(&taken, "where")?)?;
        info!("took reading {value} at {place}");
    }

    bridge.participant_cleanup(&participant)?;
    info!("done, {} entities left", provider.entity_count());
    Ok(())
}
