//! Command implementations behind the `vplay` subcommands.

use std::fs::File;
use std::io::{BufRead, BufWriter};
use std::path::Path;
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use video_player::audio::AudioController;
use video_player::audio::cpal_backend::CpalDevice;
use video_player::audio::device;
use video_player::pipeline::Player;
use video_player::source::export::export_raw;
use video_player::source::{SourceDescriptor, backend_for, total_frames};
use video_player::surface::MemorySurface;

use crate::commands::{ControlCommand, parse_line};
use crate::config::PlayConfig;

const TICK: Duration = Duration::from_millis(50);

/// Print available audio output devices.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = device::list_devices(&host)?;
    if devices.is_empty() {
        println!("no output devices");
    }
    for (i, d) in devices.iter().enumerate() {
        let marker = if d.is_default { " (default)" } else { "" };
        println!("#{i}: {}{marker} [{}-{} Hz]", d.name, d.min_rate, d.max_rate);
    }
    Ok(())
}

pub fn run_extract(input: &Path, output: &Path) -> Result<()> {
    let backend = backend_for(input)?;
    let summary = export_raw(backend.as_ref(), input, output)?;
    println!(
        "{} frames {}x{} written to {}",
        summary.frames,
        summary.width,
        summary.height,
        output.display()
    );
    Ok(())
}

pub fn run_frames(path: &Path, width: u32, height: u32) -> Result<()> {
    println!("{}", total_frames(path, width, height));
    Ok(())
}

/// Play until end of stream, `q` on stdin or Ctrl-C.
pub fn run_play(config: PlayConfig) -> Result<()> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    install_ctrlc(cmd_tx.clone());
    spawn_stdin_reader(cmd_tx);

    let mut player = match &config.source {
        SourceDescriptor::Live { uri } => {
            Player::with_backend(config.player.clone(), backend_for(uri)?)
        }
        SourceDescriptor::Precomputed { .. } => Player::new(config.player.clone()),
    };
    if let Some(audio) = &config.audio {
        player.attach_audio(AudioController::with_settings(
            Arc::new(CpalDevice::new()),
            &config.player.audio,
            Some(audio.clone()),
            config.device.clone(),
        ));
    }

    if let Some(frame) = config.start_frame {
        if !player.seek_to_frame(frame) {
            tracing::warn!(frame, "start frame ignored");
        }
    }
    let surface = MemorySurface::new();
    let presented = surface.handle();
    player.start(config.source.clone(), Box::new(surface))?;

    if let Some(audio) = player.audio_mut() {
        if let Err(e) = audio.start() {
            tracing::warn!("continuing without audio: {e:#}");
        }
    }
    if config.speed != 1.0 && !player.set_speed(config.speed) {
        tracing::warn!(speed = config.speed, "initial speed ignored");
    }

    command_loop(&mut player, &cmd_rx);
    let last_frame = player.current_frame();
    player.stop();
    tracing::info!(frame = last_frame, "playback finished");

    if let Some(path) = &config.snapshot {
        let frame = presented.lock().unwrap_or_else(PoisonError::into_inner);
        let file = File::create(path).with_context(|| format!("create {:?}", path))?;
        frame.write_ppm(BufWriter::new(file))?;
        tracing::info!(path = %path.display(), "snapshot written");
    }
    Ok(())
}

fn command_loop(player: &mut Player, commands: &Receiver<ControlCommand>) {
    loop {
        match commands.recv_timeout(TICK) {
            Ok(ControlCommand::Quit) => return,
            Ok(cmd) => apply(player, cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(TICK),
        }
        if player.reap_finished() {
            return;
        }
    }
}

fn apply(player: &mut Player, cmd: ControlCommand) {
    match cmd {
        ControlCommand::TogglePause => {
            let paused = player.toggle_pause();
            println!("{}", if paused { "paused" } else { "playing" });
        }
        ControlCommand::Resume => player.resume(),
        ControlCommand::Speed(speed) => {
            if !player.set_speed(speed) {
                println!("speed must be > 0");
            }
        }
        ControlCommand::SeekFrame(frame) => {
            if !player.seek_to_frame(frame) {
                println!("frame must be >= 0");
            }
        }
        ControlCommand::SeekMs(ms) => {
            if !player.seek_to_timestamp(ms) {
                println!("timestamp must be >= 0");
            }
        }
        ControlCommand::Status => match serde_json::to_string(&player.status()) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!("status encode failed: {e}"),
        },
        ControlCommand::Quit => {}
    }
}

fn install_ctrlc(tx: Sender<ControlCommand>) {
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(ControlCommand::Quit);
    }) {
        tracing::warn!("ctrl-c handler not installed: {e}");
    }
}

fn spawn_stdin_reader(tx: Sender<ControlCommand>) {
    let spawned = thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_line(&line) {
                    Ok(Some(cmd)) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("stdin command reader not started: {e}");
    }
}
