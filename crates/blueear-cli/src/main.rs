//! Blueear CLI
//!
//! 选择一个 BLE 角色并运行对应会话，把 Event Sink 事件打印到终端。
//! 角色切换即退出当前进程内会话、以新角色重启——会话从不原地换角色。

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use blueear_bluez::{
    BlueZBeaconAdvertiser, BlueZBeaconRanger, BlueZPeripheralAdapter, BtleplugCentralAdapter,
};
use blueear_core::{
    BeaconIdentity, BroadcasterSession, CentralSession, ChannelSink, ContentProvider,
    ObserverSession, Payload, PeripheralConfig, PeripheralSession, Role, SequenceProvider,
    ServiceDescriptor, SessionEvent, SessionState, UptimeProvider,
};
use config::AppSettings;

#[derive(Parser)]
#[command(
    name = "blueear",
    version,
    about = "BLE 角色会话管理器 - iBeacon 广播/观察与 GATT 键值交换"
)]
struct Cli {
    /// 详细日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 以 iBeacon 广播端运行
    Broadcast {
        /// region major 值
        #[arg(long)]
        major: Option<u16>,
        /// region minor 值
        #[arg(long)]
        minor: Option<u16>,
        /// beacon 标签
        #[arg(long)]
        label: Option<String>,
    },
    /// 以 iBeacon 观察端运行，打印测距结果
    Observe,
    /// 以 GATT peripheral 运行，向订阅者周期推送 payload
    Serve {
        /// 推送间隔 (秒，默认读设置)
        #[arg(short, long)]
        tick: Option<u64>,
        /// 循环推送的键值对 (key=value，可多次指定)
        #[arg(short, long = "payload")]
        payloads: Vec<String>,
    },
    /// 以 GATT central 运行，发现、连接并订阅 peripheral
    Connect {
        /// 订阅建立后写入一个 {"cmd":"ping"}
        #[arg(long)]
        ping: bool,
    },
    /// 查看或修改持久化设置
    Settings {
        /// 内容提供者: sequence 或 uptime
        #[arg(long)]
        provider: Option<String>,
        /// 设备名称
        #[arg(long)]
        device_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = AppSettings::load();

    match cli.command {
        Commands::Broadcast {
            major,
            minor,
            label,
        } => {
            let mut identity = BeaconIdentity::default();
            if let Some(major) = major {
                identity.major = major;
            }
            if let Some(minor) = minor {
                identity.minor = minor;
            }
            if let Some(label) = label {
                identity.label = label;
            }
            run_broadcast(identity).await
        }
        Commands::Observe => run_observe().await,
        Commands::Serve { tick, payloads } => run_serve(&settings, tick, payloads).await,
        Commands::Connect { ping } => run_connect(ping).await,
        Commands::Settings {
            provider,
            device_name,
        } => run_settings(settings, provider, device_name),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .init();
}

async fn run_broadcast(identity: BeaconIdentity) -> Result<()> {
    tracing::info!(role = Role::BeaconBroadcaster.name(), "starting session");
    println!(
        "📣 iBeacon 广播: {} ({} / {}.{})",
        identity.label, identity.region_id, identity.major, identity.minor
    );

    let (adapter, events) = BlueZBeaconAdvertiser::new().await?;
    let (sink, rx) = ChannelSink::new(32);
    let session = BroadcasterSession::spawn(adapter, events, identity, Arc::new(sink));
    session.start();

    pump_until_ctrl_c(rx).await;
    session.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn run_observe() -> Result<()> {
    tracing::info!(role = Role::BeaconObserver.name(), "starting session");
    println!("🔍 iBeacon 观察: region {}", BeaconIdentity::default().region_id);

    let (ranger, events) = BlueZBeaconRanger::new().await?;
    let (sink, rx) = ChannelSink::new(32);
    let session = ObserverSession::spawn(ranger, events, BeaconIdentity::default(), Arc::new(sink));
    session.start();

    pump_until_ctrl_c(rx).await;
    session.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn run_serve(settings: &AppSettings, tick: Option<u64>, payloads: Vec<String>) -> Result<()> {
    tracing::info!(role = Role::GattPeripheral.name(), "starting session");
    let provider = build_provider(settings, payloads)?;
    let config = PeripheralConfig {
        descriptor: ServiceDescriptor::default(),
        local_name: settings.device_name.clone(),
        tick_interval: Duration::from_secs(tick.unwrap_or(settings.tick_secs)),
    };
    println!(
        "📣 GATT peripheral '{}'，推送间隔 {:?}",
        config.local_name, config.tick_interval
    );

    let (adapter, events) = BlueZPeripheralAdapter::new().await?;
    let (sink, rx) = ChannelSink::new(32);
    let session = PeripheralSession::spawn(adapter, events, config, provider, Arc::new(sink));
    session.start();

    pump_until_ctrl_c(rx).await;
    session.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn run_connect(ping: bool) -> Result<()> {
    tracing::info!(role = Role::GattCentral.name(), "starting session");
    let descriptor = ServiceDescriptor::default();
    println!("🔍 GATT central: 扫描服务 {}", descriptor.service_id);

    let (adapter, events) = BtleplugCentralAdapter::new().await?;
    let (sink, rx) = ChannelSink::new(32);
    let session = Arc::new(CentralSession::spawn(adapter, events, descriptor, Arc::new(sink)));
    session.start();

    if ping {
        // 订阅建立后写入一次
        let session = session.clone();
        let mut state = session.watch_state();
        tokio::spawn(async move {
            loop {
                if *state.borrow() == SessionState::Subscribed {
                    break;
                }
                if state.changed().await.is_err() {
                    return;
                }
            }
            session.write_payload(Payload::from_pairs([("cmd", "ping")]));
        });
    }

    pump_until_ctrl_c(rx).await;
    session.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

fn run_settings(
    mut settings: AppSettings,
    provider: Option<String>,
    device_name: Option<String>,
) -> Result<()> {
    let mut changed = false;
    if let Some(provider) = provider {
        settings.use_sequence = match provider.as_str() {
            "sequence" => true,
            "uptime" => false,
            other => anyhow::bail!("unknown provider '{other}', expected 'sequence' or 'uptime'"),
        };
        changed = true;
    }
    if let Some(device_name) = device_name {
        settings.device_name = device_name;
        changed = true;
    }
    if changed {
        settings.save()?;
        println!("✅ 设置已保存");
    }
    println!("设备名称:   {}", settings.device_name);
    println!(
        "内容提供者: {}",
        if settings.use_sequence { "sequence" } else { "uptime" }
    );
    println!("推送间隔:   {}s", settings.tick_secs);
    Ok(())
}

/// 根据持久化 flag 与命令行参数挑选内容提供者
fn build_provider(
    settings: &AppSettings,
    payloads: Vec<String>,
) -> Result<Box<dyn ContentProvider>> {
    if !payloads.is_empty() {
        let items = payloads
            .iter()
            .map(|p| parse_pair(p).map(|(k, v)| Payload::from_pairs([(k, v)])))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Box::new(SequenceProvider::new(items)));
    }
    if settings.use_sequence {
        // 没配置 payload 时退化为空 payload 序列，提示用户
        println!("⚠️  未配置 payload，推送内容为空；用 --payload key=value 指定");
        Ok(Box::new(SequenceProvider::new(Vec::new())))
    } else {
        Ok(Box::new(UptimeProvider::new()))
    }
}

fn parse_pair(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => anyhow::bail!("invalid payload '{s}', expected key=value"),
    }
}

/// 打印事件流直到 Ctrl-C
async fn pump_until_ctrl_c(mut rx: mpsc::Receiver<SessionEvent>) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            event = rx.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            }
        }
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::RangedBeacon(beacon) => println!(
            "📡 {} {:?} rssi={}",
            beacon.identity.label, beacon.proximity, beacon.rssi
        ),
        SessionEvent::ConfigurationStarted => println!("⚙️  配置开始"),
        SessionEvent::ScanningStarted => println!("🔍 开始扫描"),
        SessionEvent::PeerConnected { name } => {
            println!("✅ 已连接: {}", name.as_deref().unwrap_or("<unknown>"));
        }
        SessionEvent::PeerDisconnected { name } => {
            println!("👋 已断开: {}", name.as_deref().unwrap_or("<unknown>"));
        }
        SessionEvent::DataSent => println!("📤 已发送"),
        SessionEvent::DataReceived { payload } => {
            println!("📥 收到 {} 对键值:", payload.len());
            for (key, value) in payload.iter() {
                println!("   {key} = {value}");
            }
        }
        SessionEvent::ConnectionFailed => println!("❌ 连接失败"),
        SessionEvent::AdvertisingStarted => println!("📣 广播中"),
        SessionEvent::AdvertisingStopped => println!("⏹️  广播停止"),
        SessionEvent::SessionFailed { error } => println!("❌ 会话失败: {error}"),
    }
}
