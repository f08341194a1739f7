mod checklist;
mod config;
mod context;
mod sink;
mod tools;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use ringbuf::traits::{Consumer, Split};
use tracing_subscriber::fmt::time::ChronoLocal;

use crate::checklist::ChecklistStore;
use crate::config::{Config, OUTPUT_CHUNK_SIZE, OUTPUT_LATENCY_MS};
use crate::sink::RingBufferSink;
use gemini_live::{SessionCallbacks, SessionConfig};
use interview_native_utils::capture::{CaptureEvent, MediaCapture};
use interview_native_utils::{audio, device};

#[derive(Parser)]
#[command(name = "interviewer-service", about = "Realtime mock-interview session")]
struct Cli {
    /// Title of the bundled problem to interview on (defaults to the first).
    problem: Option<String>,
    /// List audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    if args.list_devices {
        println!("Input devices:\n{}", device::describe_inputs()?);
        println!("Output devices:\n{}", device::describe_outputs()?);
        return Ok(());
    }

    let problem = context::select_problem(args.problem.as_deref());
    tracing::info!(problem = %problem.title, difficulty = %problem.difficulty, "starting interview session");

    // --- Output device and ring buffer ---

    let output = device::output_device(config.output_device.as_deref())
        .context("failed to get audio output device")?;
    tracing::info!(device = %output.name()?, "using output device");

    let output_config = output
        .default_output_config()
        .context("failed to get default output config")?;
    let output_config = StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let output_channel_count = output_config.channels as usize;
    let output_sample_rate = output_config.sample_rate.0 as f64;
    tracing::info!(config = ?output_config, "output stream config");

    let buffer_len = output_sample_rate as usize * OUTPUT_LATENCY_MS / 1000;
    let (audio_out_tx, mut audio_out_rx) = audio::shared_buffer(buffer_len).split();
    let drain = Arc::new(AtomicBool::new(false));

    let drain_for_output = drain.clone();
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        // An interrupt raised the drain flag; discard everything buffered so
        // stale speech stops within one callback.
        if drain_for_output.swap(false, Ordering::SeqCst) {
            while audio_out_rx.try_pop().is_some() {}
        }
        let mut sample_index = 0;
        while sample_index < data.len() {
            let sample = audio_out_rx.try_pop().unwrap_or(0.0);
            // Duplicate mono onto the first two channels, zero the rest.
            for ch in 0..output_channel_count {
                if sample_index < data.len() {
                    data[sample_index] = if ch < 2 { sample } else { 0.0 };
                    sample_index += 1;
                }
            }
        }
    };
    let output_stream = output.build_output_stream(
        &output_config,
        output_data_fn,
        move |err| tracing::error!(error = %err, "output stream error"),
        None,
    )?;
    output_stream.play()?;

    // --- Session ---

    let store = ChecklistStore::new();
    store.seed(problem.criteria_pairs());
    let registry = Arc::new(tools::registry(store.clone()));

    let mut session_config = SessionConfig::new(config.gemini_api_key.clone())
        .with_instruction(context::system_instruction())
        .with_greeting(context::greeting());
    if let Some(model) = &config.model {
        session_config = session_config.with_model(model.clone());
    }

    let (ready_tx, mut ready_rx) = tokio::sync::mpsc::channel::<()>(1);
    let callbacks = SessionCallbacks::new()
        .on_message(|text| tracing::info!(%text, "interviewer said"))
        .on_transcription(|text| tracing::info!(%text, "interviewer transcript"))
        .on_setup_complete(move || {
            let _ = ready_tx.try_send(());
        })
        .on_playing_state_change(|playing| tracing::debug!(playing, "playback state"))
        .on_audio_level_change(|level| tracing::trace!(level, "playback level"));

    let sink = RingBufferSink::new(audio_out_tx, output_sample_rate, drain)?;
    let session = gemini_live::connect(session_config, registry, callbacks, Box::new(sink)).await;

    // --- Capture ---

    let input = device::input_device(config.input_device.as_deref())
        .context("failed to get audio input device")?;
    tracing::info!(device = %input.name()?, "using input device");
    let mut capture = MediaCapture::start(&input, None).context("failed to start capture")?;

    // --- Main loop ---

    let mut context_sent = false;
    loop {
        tokio::select! {
            _ = ready_rx.recv(), if !context_sent => {
                context_sent = true;
                tracing::info!("session ready; sending problem context");
                session.send_new_context(context::problem_subject(&problem)).await;
                session
                    .send_supplementary_context(
                        problem.title.clone(),
                        context::solution_details(&problem),
                    )
                    .await;
                for turn in context::criteria_turns(&problem) {
                    session.send_text_turn(turn).await;
                }
            }
            event = capture.events.recv() => match event {
                Some(event) => {
                    if let CaptureEvent::AudioChunk { level, .. } = &event {
                        tracing::trace!(level, "captured audio chunk");
                    }
                    session
                        .send_media_chunk(event.data().to_string(), event.mime_type())
                        .await;
                }
                None => {
                    tracing::warn!("capture pipeline ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                session.disconnect().await;
                break;
            }
        }
    }

    for (id, state) in store.snapshot() {
        tracing::info!(
            criterion = %id,
            satisfied = state.satisfied,
            confidence = ?state.confidence,
            "final checklist state"
        );
    }
    Ok(())
}
