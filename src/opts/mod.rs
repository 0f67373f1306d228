pub mod types;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use loopshare::ServerConfig;

/// Check option combinations, exiting with a message on invalid ones.
pub fn verify_opts(opts: &types::Opts) {
    if opts.hostmask.parse::<Ipv4Addr>().is_err() {
        println!("Error: invalid host {:?}, expected an IPv4 address.", opts.hostmask);
        process::exit(1);
    }
    if opts.max_connections == 0 {
        println!("Error: --max-connections must be at least 1.");
        process::exit(1);
    }
    if opts.size_limit == 0 {
        println!("Error: --upload-size-limit must be greater than 0.");
        process::exit(1);
    }
    if opts.idle_timeout == 0 {
        println!("Error: --idle-timeout must be at least one second.");
        process::exit(1);
    }
    if opts.service_name.trim().is_empty() && !opts.no_advertise {
        println!("Error: --service-name cannot be empty.");
        process::exit(1);
    }
    if opts.log_file.is_some() && opts.headless {
        println!("Warning: --log-file and --headless have both been specified. Logs go to the file.");
    }
}

/// Build the server configuration; assumes [`verify_opts`] passed.
pub fn server_config(opts: &types::Opts) -> ServerConfig {
    let defaults = ServerConfig::default();
    ServerConfig {
        bind_host: opts.hostmask.parse().unwrap_or(defaults.bind_host),
        preferred_port: opts.port,
        storage_dir: opts
            .directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_dir),
        max_file_size: opts.size_limit,
        max_connections: opts.max_connections,
        max_header_bytes: opts.max_header_size,
        idle_timeout: Duration::from_secs(opts.idle_timeout),
        service_name: opts.service_name.trim().to_string(),
        advertise: !opts.no_advertise,
        reject_non_audio: opts.audio_only,
    }
}
