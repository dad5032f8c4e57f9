mod latency;
mod script;

use crate::latency::Latency;
use crate::script::{DeviceSpec, Script};
use anyhow::{bail, Context, Result};
use clap::Parser;
use playout_core::{Clock, CommandReceiver, Device, DeviceEvent, DeviceInstance, DeviceIntegration, DeviceSettings, RetryConfig, RetryingReceiver, SchedulerConfig, SystemClock, Timestamp, TracingReceiver};
use playout_devices::{Graphics, GraphicsCommand, Lighting, LightingCommand, VideoCommand, VideoServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	#[arg(long, env = "PLAYOUT_SCRIPT", help = "Timeline script to play")]
	script: PathBuf,

	#[arg(long, env = "LOG_LEVEL", default_value = "info", help = "Tracing filter directive")]
	log_level: String,

	#[arg(long, env = "SLOW_SENT_MS", default_value = "40", help = "Report commands sent later than this")]
	slow_sent_ms: Timestamp,

	#[arg(long, env = "SLOW_FULFILLED_MS", default_value = "100", help = "Report commands settling later than this")]
	slow_fulfilled_ms: Timestamp,

	#[arg(long, env = "SEND_LATENCY_MS", default_value = "0", help = "Artificial delay added to every send")]
	send_latency_ms: u64,

	#[arg(long, env = "GRACE_MS", default_value = "1500", help = "How long to keep running after the last state")]
	grace_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_new(&args.log_level).context("invalid --log-level")?)
		.with_target(true)
		.with_line_number(true)
		.init();

	let script = Script::load(&args.script)?;
	let clock: Arc<dyn Clock> = Arc::new(SystemClock);
	let settings = DeviceSettings::default().with_scheduler(SchedulerConfig::default().with_slow_sent_limit(args.slow_sent_ms).with_slow_fulfilled_limit(args.slow_fulfilled_ms));
	let latency = Duration::from_millis(args.send_latency_ms);
	let session = format!("sim-{}", clock.now());

	let mut devices = Vec::with_capacity(script.devices.len());
	for (device_id, spec) in &script.devices {
		let device = build_device(device_id, spec, &clock, &settings, latency)?;
		spawn_event_log(device.as_ref());
		let connected = device.init(spec.options.clone(), Some(session.clone())).await.with_context(|| format!("initializing {device_id}"))?;
		if !connected {
			tracing::warn!(device = %device_id, "device did not connect, commands will fail until it does");
		}
		device.make_ready(false, Some(session.clone())).await?;
		devices.push(device);
	}
	tracing::info!(devices = devices.len(), states = script.states.len(), %session, "simulation ready");

	let start = clock.now();
	for state in script.timeline(start) {
		for device in &devices {
			device.prepare_for_handle_state(state.time).await?;
			device.handle_state(&state, &script.mappings).await?;
		}
		tracing::debug!(time = state.time, layers = state.layers.len(), "state handed to devices");
	}

	let run_for = u64::try_from(script.last_offset()).unwrap_or_default() + args.grace_ms;
	tokio::select! {
		() = tokio::time::sleep(Duration::from_millis(run_for)) => {
			tracing::info!("timeline finished");
		}
		signal = tokio::signal::ctrl_c() => {
			signal.context("listening for ctrl-c")?;
			tracing::info!("interrupted, standing devices down");
		}
	}

	for device in &devices {
		let status = device.status();
		tracing::info!(device = device.device_id(), status = ?status.status_code, messages = ?status.messages, active = status.active, "final status");
		if let Err(e) = device.terminate().await {
			tracing::error!(device = device.device_id(), error = %e, "terminate failed");
		}
	}
	Ok(())
}

fn build_device(device_id: &str, spec: &DeviceSpec, clock: &Arc<dyn Clock>, settings: &DeviceSettings, latency: Duration) -> Result<Arc<dyn Device>> {
	let device = match spec.device_type.as_str() {
		playout_devices::video_server::DEVICE_TYPE => instance::<VideoServer>(device_id, Arc::new(Latency::new(TracingReceiver::<VideoCommand>::new(device_id), latency)), clock, settings),
		playout_devices::graphics::DEVICE_TYPE => {
			let receiver = RetryingReceiver::new(Latency::new(TracingReceiver::<GraphicsCommand>::new(device_id), latency), RetryConfig::default());
			instance::<Graphics>(device_id, Arc::new(receiver), clock, settings)
		}
		playout_devices::lighting::DEVICE_TYPE => instance::<Lighting>(device_id, Arc::new(Latency::new(TracingReceiver::<LightingCommand>::new(device_id), latency)), clock, settings),
		other => bail!("device {device_id} has unsupported type {other}, expected one of {:?}", playout_devices::DEVICE_TYPES),
	};
	Ok(device)
}

fn instance<I: DeviceIntegration>(device_id: &str, receiver: Arc<dyn CommandReceiver<I::Command>>, clock: &Arc<dyn Clock>, settings: &DeviceSettings) -> Arc<dyn Device> {
	Arc::new(DeviceInstance::<I>::with_settings(device_id, receiver, Arc::clone(clock), settings.clone()))
}

fn spawn_event_log(device: &dyn Device) {
	let device_id = device.device_id().to_string();
	let mut events = device.subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(event) => log_event(&device_id, &event),
				Err(RecvError::Lagged(skipped)) => tracing::warn!(device = %device_id, skipped, "event log fell behind"),
				Err(RecvError::Closed) => break,
			}
		}
	});
}

fn log_event(device: &str, event: &DeviceEvent) {
	match event {
		DeviceEvent::Info(message) => tracing::info!(device, "{message}"),
		DeviceEvent::Warning(message) => tracing::warn!(device, "{message}"),
		DeviceEvent::Error { context, message } => tracing::error!(device, %context, "{message}"),
		DeviceEvent::Debug(message) => tracing::debug!(device, "{message}"),
		DeviceEvent::ConnectionChanged(status) => tracing::info!(device, status = ?status.status_code, active = status.active, "connection changed"),
		DeviceEvent::ResetResolver => tracing::info!(device, "device asked for a full resend"),
		DeviceEvent::SlowCommand(message) => tracing::warn!(device, "{message}"),
		DeviceEvent::SlowSentCommand(timing) => tracing::warn!(device, queue = %timing.queue_id, send_delay = timing.send_delay, internal_delay = timing.internal_delay, "command sent late"),
		DeviceEvent::SlowFulfilledCommand(report) => tracing::warn!(device, queue = %report.timing.queue_id, fulfilled_delay = report.fulfilled_delay, "command settled late"),
		DeviceEvent::CommandError { message, context } => tracing::error!(device, obj = %context.timeline_obj_id, layer = %context.layer, context = %context.context, "{message}"),
		DeviceEvent::CommandReport(report) => tracing::debug!(device, planned = report.timing.planned_send, send_delay = report.timing.send_delay, succeeded = report.succeeded, "command settled"),
	}
}
