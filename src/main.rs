mod display;
mod opts;
mod term;

use clap::Parser;

use loopshare::{ServerEvent, TransferServer};

use opts::types::Opts;

use tracing_subscriber::EnvFilter;

use std::fs::OpenOptions;
use std::io;
use std::process;
use std::sync::{mpsc, Mutex};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,loopshare=info"))
}

fn init_logging(opts: &Opts, interactive: bool) -> Result<(), io::Error> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    match &opts.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        // Anything written to the terminal would tear the dashboard.
        None if interactive => builder.with_writer(io::sink).init(),
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

fn run_headless(server: &mut TransferServer) {
    let events = server.subscribe();
    let (tx, rx) = mpsc::channel::<()>();
    let _ = ctrlc::set_handler(move || {
        let _ = tx.send(());
    });

    if let Some(url) = server.url() {
        println!("Open {} in a browser to upload", url);
    }

    loop {
        if rx.try_recv().is_ok() {
            break;
        }
        match events.recv_timeout(std::time::Duration::from_millis(200)) {
            Ok(ServerEvent::FileReceived(file)) => {
                println!("Received {} ({} bytes)", file.path.display(), file.size_bytes);
            }
            Ok(_) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    server.stop();
}

fn main() {
    let opts: Opts = Opts::parse();
    opts::verify_opts(&opts);

    let interactive = !opts.headless && term::check_terminal();
    if let Err(e) = init_logging(&opts, interactive) {
        eprintln!("Failed to open log file: {}", e);
        process::exit(1);
    }

    let mut server = TransferServer::with_default_inspector(opts::server_config(&opts));
    // Subscribe before starting so the dashboard sees every event.
    let events = server.subscribe();

    match server.start() {
        Ok(port) => {
            if port != opts.port {
                tracing::warn!(requested = opts.port, port, "port was busy, using another");
            }
        }
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            process::exit(1);
        }
    }

    if !interactive {
        drop(events);
        run_headless(&mut server);
        return;
    }

    let (tx, rx) = mpsc::channel();
    display::spawn_key_reader(tx);
    if let Err(e) = display::display(&mut server, events, rx, &opts) {
        tracing::error!(error = %e, "display failed");
        server.stop();
        eprintln!("Terminal error: {}", e);
        process::exit(1);
    }
    server.stop();
}
