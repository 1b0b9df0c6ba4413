//! Hearfit - 2AFC audiogram and EQ fitting console
//!
//! Entry point for the interactive fitting tool. The tone device is any
//! writable character device speaking the line protocol (e.g. a serial
//! tty such as `/dev/ttyACM0`).

use anyhow::Result;
use hearfit::audiogram::session::{SessionCanceller, SessionEvent};
use hearfit::profile::store::DirStorage;
use hearfit::{
    AudiogramResult, AudiogramSession, EqGainSet, EqMapper, FitConfig, Interval, LineDevice,
    Profile, ProfileStore, SessionOutcome, SharedDevice,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hearfit=info".parse().unwrap()),
        )
        .init();

    println!("Hearfit v{} - 2AFC audiogram + EQ fitting", hearfit::VERSION);
    println!();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    let mut device_path: Option<String> = None;
    let mut profiles_dir: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                let store = open_store(profiles_dir);
                list_profiles(&store);
                return Ok(());
            }
            "--version" | "-v" => {
                println!("hearfit {}", hearfit::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--device" | "-d" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --device requires a path");
                    return Ok(());
                }
                device_path = Some(args[i + 1].clone());
                i += 2;
                continue;
            }
            "--profiles" | "-p" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --profiles requires a directory");
                    return Ok(());
                }
                profiles_dir = Some(PathBuf::from(&args[i + 1]));
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
    }

    let mut app = App::new(open_store(profiles_dir));

    if let Some(path) = device_path {
        app.connect(&path);
    }

    app.run()
}

fn print_help() {
    println!("Usage: hearfit [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --device PATH     Connect to the tone device at PATH (serial tty)");
    println!("  -p, --profiles DIR    Profiles directory (default: data dir)");
    println!("  -l, --list            List saved profiles and exit");
    println!("  -v, --version         Show version");
    println!("  -h, --help            Show this help");
    println!();
    println!("Without --list, starts the interactive fitting console.");
}

fn open_store(dir: Option<PathBuf>) -> ProfileStore {
    match dir {
        Some(dir) => ProfileStore::new(DirStorage::new(dir)),
        None => ProfileStore::open_default(),
    }
}

fn list_profiles(store: &ProfileStore) {
    match store.list() {
        Ok(names) if names.is_empty() => println!("No profiles saved."),
        Ok(names) => {
            println!("Profiles:");
            for name in names {
                println!("  {}", name);
            }
        }
        Err(e) => println!("Error: {}", e),
    }
}

struct App {
    config: FitConfig,
    store: ProfileStore,
    device: SharedDevice<LineDevice<File>>,
    session: Option<AudiogramSession>,
    results: Option<AudiogramResult>,
    eq: EqGainSet,
    canceller: Arc<Mutex<Option<SessionCanceller>>>,
}

impl App {
    fn new(store: ProfileStore) -> Self {
        Self {
            config: FitConfig::load(),
            store,
            device: SharedDevice::disconnected(),
            session: None,
            results: None,
            eq: EqGainSet::flat(),
            canceller: Arc::new(Mutex::new(None)),
        }
    }

    fn run(&mut self) -> Result<()> {
        // Ctrl+C cancels a running session instead of killing the console
        let canceller = Arc::clone(&self.canceller);
        ctrlc::set_handler(move || {
            if let Ok(guard) = canceller.lock() {
                if let Some(c) = guard.as_ref() {
                    c.cancel();
                }
            }
        })
        .ok();

        println!("Type 'help' for commands.");
        let stdin = io::stdin();
        loop {
            print!("> ");
            io::stdout().flush()?;

            let mut line = String::new();
            if stdin.read_line(&mut line)? == 0 {
                break;
            }
            let mut parts = line.split_whitespace();
            let command = match parts.next() {
                Some(c) => c.to_lowercase(),
                None => continue,
            };
            let rest: Vec<&str> = parts.collect();

            match command.as_str() {
                "help" => self.print_commands(),
                "connect" => match rest.first() {
                    Some(path) => self.connect(path),
                    None => println!("Usage: connect PATH"),
                },
                "disconnect" => {
                    self.device.disconnect();
                    println!("Disconnected.");
                }
                "start" => self.start_session(),
                "a" => self.respond(Interval::A),
                "b" => self.respond(Interval::B),
                "cancel" => {
                    if let Some(session) = &self.session {
                        session.cancel();
                    } else {
                        println!("No session running.");
                    }
                }
                "results" => self.show_results(),
                "compute" => self.compute_eq(),
                "gain" => match rest.first().and_then(|s| s.parse::<f64>().ok()) {
                    Some(g) => {
                        self.eq.gain_global = g;
                        println!("Global gain set to {:.3}", g);
                    }
                    None => println!("Usage: gain X"),
                },
                "eq" => self.set_eq(&rest),
                "apply" => self.apply(&rest),
                "save" => match rest.first() {
                    Some(_) => self.save_profile(&rest.join(" ")),
                    None => println!("Usage: save NAME"),
                },
                "load" => match rest.first() {
                    Some(_) => self.load_profile(&rest.join(" ")),
                    None => println!("Usage: load NAME"),
                },
                "list" => list_profiles(&self.store),
                "delete" => match rest.first() {
                    Some(_) => self.delete_profile(&rest.join(" ")),
                    None => println!("Usage: delete NAME"),
                },
                "quit" | "exit" => break,
                other => println!("Unknown command: {} (try 'help')", other),
            }
        }

        // Stop a still-running session before leaving
        if let Some(mut session) = self.session.take() {
            session.cancel();
            let _ = session.join();
        }
        Ok(())
    }

    fn print_commands(&self) {
        println!("Commands:");
        println!("  connect PATH / disconnect   attach the tone device");
        println!("  start / cancel              run or stop an audiogram");
        println!("  a / b                       answer which interval held the tone");
        println!("  results                     show measured thresholds");
        println!("  compute                     derive band gains from thresholds");
        println!("  gain X | eq LOW MID HIGH    adjust current EQ by hand");
        println!("  apply [NAME]                send current EQ (or a profile) to device");
        println!("  save NAME | load NAME       persist / recall profiles");
        println!("  list | delete NAME          manage profiles");
        println!("  quit");
    }

    fn connect(&mut self, path: &str) {
        match OpenOptions::new().write(true).open(path) {
            Ok(file) => {
                self.device.connect(LineDevice::new(file));
                info!(path, "Device connected");
                println!("Connected: {}", path);
            }
            Err(e) => {
                error!(path, error = %e, "Failed to open device");
                println!("Connect failed: {}", e);
            }
        }
    }

    fn start_session(&mut self) {
        if !self.device.is_connected() {
            println!("Not connected. Use 'connect PATH' first.");
            return;
        }
        self.reap_session();
        if self.session.is_some() {
            println!("A session is already running.");
            return;
        }

        self.results = None;
        let mut session = AudiogramSession::new(self.config.clone());
        if let Err(e) = session.start(self.device.clone()) {
            println!("Start failed: {}", e);
            return;
        }

        if let Ok(mut guard) = self.canceller.lock() {
            *guard = session.canceller();
        }

        // Foreground printer: the worker publishes events, never shared
        // mutable state
        if let Some(events) = session.events() {
            std::thread::spawn(move || {
                for event in events {
                    match event {
                        SessionEvent::FrequencyStarted { index, total, freq_hz } => {
                            println!("[{}/{}] {} Hz - answer a/b after both intervals", index, total, freq_hz);
                        }
                        SessionEvent::PlayingInterval { interval } => {
                            println!("Playing interval {}...", interval.label());
                        }
                        SessionEvent::AwaitingResponse { freq_hz, level_db } => {
                            println!("{} Hz | level {:.1} dB | Where was the tone? a or b", freq_hz, level_db);
                        }
                        SessionEvent::ThresholdRecorded { freq_hz, threshold_db } => {
                            println!("{} Hz -> threshold {:.1} dB", freq_hz, threshold_db);
                        }
                        SessionEvent::Completed => {
                            println!("Audiogram complete. Use 'results' / 'compute'.");
                            break;
                        }
                        SessionEvent::Cancelled => {
                            println!("Audiogram stopped.");
                            break;
                        }
                        SessionEvent::Failed { message } => {
                            println!("Session failed: {}", message);
                            break;
                        }
                    }
                }
            });
        }

        self.session = Some(session);
        println!("Audiogram started ({} frequencies).", self.config.freqs_hz.len());
    }

    fn respond(&mut self, chosen: Interval) {
        match &self.session {
            Some(session) => session.respond(chosen),
            None => println!("No session running."),
        }
    }

    /// Collect the outcome of a finished worker, keeping completed and
    /// partially completed thresholds
    fn reap_session(&mut self) {
        let finished = self
            .session
            .as_ref()
            .map(|s| s.is_finished())
            .unwrap_or(false);
        if !finished {
            return;
        }
        if let Ok(mut guard) = self.canceller.lock() {
            *guard = None;
        }
        if let Some(mut session) = self.session.take() {
            match session.join() {
                Ok(outcome) => {
                    let result = outcome.result().clone();
                    if !result.is_empty() {
                        self.results = Some(result);
                    }
                    if let SessionOutcome::Cancelled(_) = outcome {
                        info!("Session ended by cancellation");
                    }
                }
                Err(e) => println!("Session error: {}", e),
            }
        }
    }

    fn show_results(&mut self) {
        self.reap_session();
        match &self.results {
            Some(results) => {
                println!("Frequency (Hz)  Threshold (dB rel)");
                for (freq, threshold) in results.iter() {
                    println!("{:>13}  {:>17.1}", freq, threshold);
                }
            }
            None => println!("No audiogram results yet."),
        }
    }

    fn compute_eq(&mut self) {
        self.reap_session();
        let Some(results) = &self.results else {
            println!("Run an audiogram first.");
            return;
        };
        let solution = EqMapper::from_config(&self.config).map_result(results);
        self.eq = solution.gain_set(self.eq.gain_global);
        println!(
            "Computed EQ: EQ500={:.1} | EQ2000={:.1} | EQ4000={:.1} (ref {:.1} dB)",
            self.eq.low_db, self.eq.mid_db, self.eq.high_db, solution.provenance.reference_db
        );
    }

    fn set_eq(&mut self, args: &[&str]) {
        let parsed: Vec<f64> = args.iter().filter_map(|s| s.parse().ok()).collect();
        if parsed.len() != 3 {
            println!("Usage: eq LOW MID HIGH (dB)");
            return;
        }
        self.eq.low_db = parsed[0];
        self.eq.mid_db = parsed[1];
        self.eq.high_db = parsed[2];
        println!(
            "EQ set: EQ500={:.1} | EQ2000={:.1} | EQ4000={:.1}",
            self.eq.low_db, self.eq.mid_db, self.eq.high_db
        );
    }

    fn apply(&mut self, args: &[&str]) {
        use hearfit::ToneSink;

        let eq = if args.is_empty() {
            self.eq
        } else {
            match self.store.load(&args.join(" ")) {
                Ok(profile) => profile.eq,
                Err(e) => {
                    println!("Load failed: {}", e);
                    return;
                }
            }
        };
        match self.device.apply_eq(&eq) {
            Ok(()) => println!("EQ applied to device."),
            Err(e) => println!("Apply failed: {}", e),
        }
    }

    fn save_profile(&mut self, name: &str) {
        self.reap_session();
        let profile = match &self.results {
            Some(results) => {
                let solution = EqMapper::from_config(&self.config).map_result(results);
                self.eq = solution.gain_set(self.eq.gain_global);
                Profile::from_audiogram(results, &solution, self.eq.gain_global)
            }
            None => Profile::manual(self.eq),
        };
        match self.store.save(name, &profile) {
            Ok(()) => println!("Profile saved: {}", name.trim()),
            Err(e) => println!("Save failed: {}", e),
        }
    }

    fn load_profile(&mut self, name: &str) {
        match self.store.load(name) {
            Ok(profile) => {
                self.eq = profile.eq;
                println!(
                    "Loaded '{}': gain={:.2} EQ500={:.1} EQ2000={:.1} EQ4000={:.1}",
                    name.trim(),
                    self.eq.gain_global,
                    self.eq.low_db,
                    self.eq.mid_db,
                    self.eq.high_db
                );
            }
            Err(e) => println!("Load failed: {}", e),
        }
    }

    fn delete_profile(&mut self, name: &str) {
        match self.store.delete(name) {
            Ok(()) => println!("Deleted: {}", name.trim()),
            Err(e) => println!("Delete failed: {}", e),
        }
    }
}
