use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture,
        Event, KeyCode, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
        PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement},
};
use dwellkey::config::Config;
use dwellkey::input::InputMapper;
use dwellkey::{Collaborators, GridLayout, InputService, SelectionEvent};
use std::io::{stdout, Write};
use std::path::Path;
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = match std::env::args().nth(1).as_deref() {
        Some("--init") => {
            match Config::default().save()? {
                Some(path) => println!("Wrote default config to {}", path.display()),
                None => eprintln!("No config directory on this system"),
            }
            return Ok(());
        }
        Some(path) => Config::load_from(Path::new(path))?,
        None => Config::load()?,
    };

    let layout = GridLayout::from_config(&config.layout)?;
    if layout.is_empty() {
        log::warn!("Key layout has no keys; selections will carry no key");
    } else {
        log::info!("Key layout has {} keys", layout.len());
    }
    let service = InputService::start(&config, Collaborators::new(layout)).await?;

    if let Some(addr) = service.local_addr() {
        println!("Listening for gaze packets on {addr}");
    }
    println!("Esc quits, F5 suspends or resumes");

    // Setup terminal
    enable_raw_mode()?;
    let key_releases = supports_keyboard_enhancement().unwrap_or(false);
    let mut out = stdout();
    execute!(out, EnableMouseCapture, EnableFocusChange)?;
    if key_releases {
        execute!(
            out,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
        )?;
    }

    let result = run(&service, InputMapper::new(key_releases)).await;

    // Restore terminal
    if key_releases {
        execute!(out, PopKeyboardEnhancementFlags)?;
    }
    execute!(out, DisableFocusChange, DisableMouseCapture)?;
    disable_raw_mode()?;
    service.shutdown();

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(service: &InputService, mapper: InputMapper) -> Result<()> {
    // Terminal reads block, so they get their own thread
    let (tx, mut events) = mpsc::unbounded_channel();
    std::thread::spawn(move || loop {
        let event = event::read();
        let failed = event.is_err();
        if tx.send(event).is_err() || failed {
            return;
        }
    });

    let inputs = service.input_sender();
    let mut selections = service.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                let event = event.context("failed to read terminal event")?;

                if let Event::Key(key) = &event {
                    if key.kind == KeyEventKind::Press {
                        match key.code {
                            KeyCode::Esc => return Ok(()),
                            KeyCode::F(5) => {
                                if service.request_suspend() {
                                    print_line("suspended")?;
                                } else if service.request_resume() {
                                    print_line("running")?;
                                }
                                continue;
                            }
                            _ => {}
                        }
                    }
                }

                for input in mapper.map(event) {
                    // Only fails when nothing is listening
                    let _ = inputs.send(input);
                }
            }
            selection = selections.recv() => match selection {
                Ok(selection) => print_line(&describe(&selection))?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("{skipped} selections were not shown");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

fn describe(selection: &SelectionEvent) -> String {
    let key = selection
        .key
        .as_ref()
        .map_or_else(|| "-".to_string(), |k| k.to_string());
    let point = selection
        .point
        .map_or_else(|| "-".to_string(), |p| format!("({:.0}, {:.0})", p.x, p.y));

    let mut line = format!("{}: key {key} at {point}", selection.channel);
    if !selection.captured.is_empty() {
        let captured: Vec<String> = selection
            .captured
            .iter()
            .map(|c| c.key.as_ref().map_or_else(|| "-".to_string(), |k| k.to_string()))
            .collect();
        line.push_str(&format!(" after [{}]", captured.join(", ")));
    }
    line
}

/// Raw mode needs an explicit carriage return
fn print_line(line: &str) -> Result<()> {
    let mut out = stdout();
    write!(out, "{line}\r\n")?;
    out.flush()?;
    Ok(())
}
