pub mod types;

use crate::opts::types::Opts;

use types::{ControlEvent, Dashboard};

use loopshare::http::rendering::format_size;
use loopshare::{ServerEvent, TransferServer};

use termion::{event::Key, input::TermRead, raw::IntoRawMode, screen::AlternateScreen};
use tui::{
    backend::TermionBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Span, Spans},
    widgets::{Block, Borders, Gauge, List, ListItem},
    Terminal,
};

use std::{io, sync::mpsc, thread, time};

fn line(text: String) -> ListItem<'static> {
    ListItem::new(vec![Spans::from(Span::raw(text))])
}

fn information(dashboard: &Dashboard, server: &TransferServer) -> Vec<ListItem<'static>> {
    let state = &dashboard.state;
    let config = server.config();
    vec![
        line(format!(
            "Status: {}",
            if state.running {
                "Accepting uploads"
            } else {
                "Stopped"
            }
        )),
        line(format!(
            "Open in a browser: {}",
            state.url().unwrap_or_else(|| "-".to_string())
        )),
        line(format!("Saving to {}", config.storage_dir.display())),
        line(format!(
            "Discovery: {}",
            match &state.service_name {
                Some(name) => format!("advertised as {:?}", name),
                None if config.advertise && state.running => "unavailable".to_string(),
                None => "off".to_string(),
            }
        )),
        line(format!(
            "Limits: {} per file, {} connections ({} rejected)",
            format_size(config.max_file_size),
            config.max_connections,
            state.rejected_connections
        )),
        line(format!(
            "Last error: {}",
            state.last_error.map(|k| k.describe()).unwrap_or("none")
        )),
    ]
}

fn last_file(dashboard: &Dashboard) -> String {
    match &dashboard.last_file {
        Some(file) => format!(
            "{} ({}{})",
            file.path.display(),
            format_size(file.size_bytes),
            if file.has_audio_track {
                ""
            } else {
                ", no audio track found"
            }
        ),
        None => "Nothing received yet".to_string(),
    }
}

/// Forward key presses as control events until the receiver goes away.
pub fn spawn_key_reader(tx: mpsc::Sender<ControlEvent>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for key in stdin.keys() {
            let event = match key {
                Ok(Key::Char('q')) | Ok(Key::Ctrl('c')) | Ok(Key::Esc) => ControlEvent::Quit,
                Ok(Key::Char('t')) => ControlEvent::Toggle,
                Ok(_) => continue,
                Err(_) => ControlEvent::Quit,
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    });
}

pub fn display(
    server: &mut TransferServer,
    events: mpsc::Receiver<ServerEvent>,
    rx: mpsc::Receiver<ControlEvent>,
    opts: &Opts,
) -> Result<(), io::Error> {
    let stdout = io::stdout().into_raw_mode()?;
    let stdout = AlternateScreen::from(stdout);
    let backend = TermionBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut dashboard = Dashboard::new();

    'outer: loop {
        for event in events.try_iter() {
            dashboard.apply(event);
        }

        let info = information(&dashboard, server);
        let connections: Vec<ListItem> = dashboard
            .state
            .active_connections
            .iter()
            .map(|id| line(id.to_string()))
            .collect();
        let history: Vec<ListItem> = dashboard.history.iter().map(|s| line(s.to_string())).collect();
        let percent = (dashboard.state.transfer_progress.clamp(0.0, 1.0) * 100.0).round() as u16;
        let received = last_file(&dashboard);

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints(
                    [
                        Constraint::Length(8),
                        Constraint::Length(3),
                        Constraint::Length(3),
                        Constraint::Min(3),
                        Constraint::Percentage(40),
                    ]
                    .as_ref(),
                )
                .split(f.size());

            let block = List::new(info).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Information (t: start/stop, q: quit)"),
            );
            f.render_widget(block, chunks[0]);

            let gauge = Gauge::default()
                .block(Block::default().borders(Borders::ALL).title("Transfer"))
                .gauge_style(Style::default().fg(Color::Green))
                .percent(percent);
            f.render_widget(gauge, chunks[1]);

            let block = List::new(vec![line(received)])
                .block(Block::default().borders(Borders::ALL).title("Last file"));
            f.render_widget(block, chunks[2]);

            let block = List::new(connections)
                .block(Block::default().borders(Borders::ALL).title("Connections"));
            f.render_widget(block, chunks[3]);

            let block = List::new(history).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Request History"),
            );
            f.render_widget(block, chunks[4]);
        })?;

        loop {
            match rx.try_recv() {
                Ok(ControlEvent::Quit) => {
                    break 'outer;
                }
                Ok(ControlEvent::Toggle) => {
                    if server.is_running() {
                        server.stop();
                    } else if let Err(e) = server.start() {
                        tracing::error!(error = %e, "display: restart failed");
                    }
                }
                Err(mpsc::TryRecvError::Empty) => {
                    break;
                }
                Err(mpsc::TryRecvError::Disconnected) => {
                    break 'outer;
                }
            }
        }

        thread::sleep(time::Duration::from_millis(opts.ui_refresh_rate));
    }

    Ok(())
}
