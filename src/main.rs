//! Layerloop - layered loop composer
//!
//! Builds a composition from the command line, plays (or records) it for a
//! while and draws the live spectrum as a line of bars. `--preview`
//! auditions the active layer's sample on its own instead.

use clap::Parser;
use std::io::Write;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use layerloop::cli::Args;
use layerloop::{Composition, CompositionEvent, ReplayEvent, ReplayPlayer, Result};

/// Spectrum refresh period (~20 Hz)
const FRAME: Duration = Duration::from_millis(50);

const BAR_GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render z-scored bars as block glyphs (about ±2σ full scale)
fn bar_line(bars: &[f32]) -> String {
    bars.iter()
        .map(|v| {
            let level = ((v + 2.0) / 4.0 * 8.0).round().clamp(0.0, 8.0) as usize;
            BAR_GLYPHS[level]
        })
        .collect()
}

fn draw(bars: &[f32], elapsed: Duration) {
    print!("\r{:6.2}s |{}|", elapsed.as_secs_f32(), bar_line(bars));
    let _ = std::io::stdout().flush();
}

fn build_composition(args: &Args) -> Result<Composition> {
    let mut composition = Composition::new(args.composition_config())?;

    for (i, layer) in args.layers.iter().enumerate() {
        if i > 0 {
            composition.add_instrumental_layer(None);
        }
        composition.update_active_sample(
            Some(layer.sample.clone()),
            layer.interval_secs,
            layer.volume,
        );
    }

    for voice in &args.voices {
        let id = composition.add_vocal_layer();
        composition.update_active_recording(voice.path.clone());
        if voice.looping {
            composition.toggle_loop(id);
        }
    }

    for layer in composition.layers() {
        match layer.bpm() {
            Some(bpm) => println!("  {} ({:.0} bpm)", layer, bpm),
            None => println!("  {}", layer),
        }
    }
    Ok(composition)
}

fn run_composition(args: &Args) -> Result<()> {
    let mut composition = build_composition(args)?;
    let events = composition.subscribe();

    if args.preview {
        composition.start_preview()?;
    } else if args.record {
        let path = composition.record()?;
        println!("Recording to {}", path.display());
    } else {
        composition.play()?;
    }

    let duration = args.duration();
    let started = Instant::now();
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        if args.offline {
            composition.advance(FRAME.min(duration - elapsed));
            elapsed += FRAME.min(duration - elapsed);
        } else {
            std::thread::sleep(FRAME);
            composition.pump();
            elapsed = started.elapsed();
        }

        let mut refreshed = false;
        for event in events.try_iter() {
            match event {
                CompositionEvent::SpectrumUpdated => refreshed = true,
                CompositionEvent::PreviewTriggered { interval_secs } => {
                    print!("\r{:6.2}s ♪ {:.0} bpm", elapsed.as_secs_f32(), 60.0 / interval_secs);
                    let _ = std::io::stdout().flush();
                }
                _ => {}
            }
        }
        if refreshed {
            draw(&composition.spectrum(), elapsed);
        }
    }
    println!();

    composition.stop_preview();
    composition.stop();
    for event in events.try_iter() {
        if let CompositionEvent::RecordFinished(path) = event {
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}

fn run_replay(args: &Args, path: &std::path::Path) -> Result<()> {
    let config = args.composition_config();
    let mut player = ReplayPlayer::new(config.engine, config.analyzer)?;
    player.play(path)?;
    println!("Replaying {}", path.display());

    loop {
        let events = if args.offline {
            player.advance(FRAME)
        } else {
            std::thread::sleep(FRAME);
            player.poll()
        };

        if events.contains(&ReplayEvent::SpectrumUpdated) {
            draw(&player.spectrum(), player.current_time());
        }
        if events.contains(&ReplayEvent::PlaybackComplete) || !player.is_playing() {
            break;
        }
    }
    println!();

    info!(seconds = player.current_time().as_secs_f64(), "Replay finished");
    player.stop();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("layerloop=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("Layerloop - layered loop composer");

    let result = match args.replay.as_deref() {
        Some(path) => run_replay(&args, path),
        None => run_composition(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_recoverable() {
                warn!(code = e.error_code(), "{}", e);
            } else {
                error!(code = e.error_code(), "{}", e);
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_line_scale() {
        assert_eq!(bar_line(&[-5.0, -2.0, 0.0, 2.0, 5.0]), "  ▄██");
    }
}
