use chant_core::*;
use clap::{Parser, Subcommand};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chant")]
#[command(about = "Chant counting companion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record manual chant repetitions (default)
    Tally {
        /// Counting mode (voice, silent)
        #[arg(long, default_value = "silent")]
        mode: String,

        /// Number of repetitions to record
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,
    },

    /// Count phrase occurrences in transcript lines read from stdin
    Transcribe,

    /// Show counter state, today's tally, and milestone progress
    Status,

    /// Reset a counter (full target in down sub-mode, zero otherwise)
    Reset {
        /// Counting mode (voice, silent)
        #[arg(long, default_value = "silent")]
        mode: String,
    },

    /// Summarize history over a range
    Stats {
        /// Range (day, week, month, year)
        #[arg(long, default_value = "week")]
        range: String,
    },

    /// Export the history ledger to CSV
    Export {
        /// Output file path
        #[arg(long)]
        out: PathBuf,
    },

    /// Configure a counter's sub-mode, target, or timer duration
    Set {
        /// Counting mode (voice, silent)
        #[arg(long)]
        mode: String,

        /// Sub-mode (up, down, timer)
        #[arg(long)]
        sub_mode: Option<String>,

        /// Target for down sub-mode
        #[arg(long)]
        target: Option<u64>,

        /// Timer duration in minutes for timer sub-mode
        #[arg(long)]
        timer_duration: Option<u64>,
    },

    /// Configure interval reminders
    Reminder {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long, conflicts_with = "enable")]
        disable: bool,

        /// Fire a reminder every N counts
        #[arg(long)]
        interval: Option<u64>,

        /// Reminder sound identifier
        #[arg(long)]
        sound: Option<String>,
    },

    /// Run an interactive counting session (Enter = tally, q = quit)
    Session {
        /// Counting mode (voice, silent)
        #[arg(long, default_value = "silent")]
        mode: String,

        /// Countdown length in minutes; defaults to the counter's
        /// configured duration when its sub-mode is timer
        #[arg(long)]
        minutes: Option<u64>,
    },
}

fn main() -> Result<()> {
    chant_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let store_path = data_dir.join("state.json");

    match cli.command {
        Some(Commands::Tally { mode, count }) => cmd_tally(&store_path, &mode, count),
        Some(Commands::Transcribe) => cmd_transcribe(&store_path, &config),
        Some(Commands::Status) => cmd_status(&store_path),
        Some(Commands::Reset { mode }) => cmd_reset(&store_path, &mode),
        Some(Commands::Stats { range }) => cmd_stats(&store_path, &range),
        Some(Commands::Export { out }) => cmd_export(&store_path, &out),
        Some(Commands::Set {
            mode,
            sub_mode,
            target,
            timer_duration,
        }) => cmd_set(&store_path, &mode, sub_mode, target, timer_duration),
        Some(Commands::Reminder {
            enable,
            disable,
            interval,
            sound,
        }) => cmd_reminder(&store_path, enable, disable, interval, sound),
        Some(Commands::Session { mode, minutes }) => cmd_session(&store_path, &mode, minutes),
        None => cmd_tally(&store_path, "silent", 1),
    }
}

fn parse_mode(s: &str) -> Result<Mode> {
    match s.to_lowercase().as_str() {
        "voice" => Ok(Mode::Voice),
        "silent" => Ok(Mode::Silent),
        other => Err(Error::Config(format!(
            "Unknown mode '{}' (expected voice or silent)",
            other
        ))),
    }
}

fn parse_sub_mode(s: &str) -> Result<SubMode> {
    match s.to_lowercase().as_str() {
        "up" => Ok(SubMode::Up),
        "down" => Ok(SubMode::Down),
        "timer" => Ok(SubMode::Timer),
        other => Err(Error::Config(format!(
            "Unknown sub-mode '{}' (expected up, down, or timer)",
            other
        ))),
    }
}

fn parse_range(s: &str) -> Result<StatsRange> {
    match s.to_lowercase().as_str() {
        "day" => Ok(StatsRange::Day),
        "week" => Ok(StatsRange::Week),
        "month" => Ok(StatsRange::Month),
        "year" => Ok(StatsRange::Year),
        other => Err(Error::Config(format!(
            "Unknown range '{}' (expected day, week, month, or year)",
            other
        ))),
    }
}

/// Wire an engine to fresh event and notification channels.
fn build_engine(
    store: PersistentStore,
) -> (
    CountingEngine,
    Sender<EngineEvent>,
    Receiver<EngineEvent>,
    Receiver<Notification>,
) {
    let (events_tx, events_rx) = unbounded();
    let (notify_tx, notify_rx) = unbounded();
    let engine = CountingEngine::new(store, events_tx.clone(), notify_tx);
    (engine, events_tx, events_rx, notify_rx)
}

fn render_notifications(rx: &Receiver<Notification>) -> bool {
    let mut timer_ended = false;
    while let Ok(notification) = rx.try_recv() {
        match notification {
            Notification::CountChanged(count) => println!("  count: {}", count),
            Notification::TimerTick(remaining) => {
                println!("  timer: {:02}:{:02}", remaining / 60, remaining % 60)
            }
            Notification::Complete(CompletionReason::TargetReached) => {
                println!("✓ Target reached!")
            }
            Notification::Complete(CompletionReason::TimerEnded) => {
                println!("✓ Timer ended");
                timer_ended = true;
            }
            Notification::Complete(CompletionReason::IntervalReached) => {
                println!("♪ Interval reminder")
            }
            Notification::Milestone(threshold) => {
                println!("★ Milestone unlocked: {} lifetime chants", threshold)
            }
        }
    }
    timer_ended
}

fn cmd_tally(store_path: &PathBuf, mode: &str, count: u64) -> Result<()> {
    let mode = parse_mode(mode)?;
    let store = PersistentStore::open(store_path)?;
    let (mut engine, _events_tx, _events_rx, notify_rx) = build_engine(store);

    engine.set_mode(mode);
    for _ in 0..count {
        engine.increment()?;
    }
    render_notifications(&notify_rx);

    println!(
        "{} counter at {}",
        mode.as_str(),
        engine.store().counter(mode).count
    );
    Ok(())
}

fn cmd_transcribe(store_path: &PathBuf, config: &Config) -> Result<()> {
    /// Stand-in backend: segments arrive pre-transcribed on stdin, so
    /// there is nothing to start or stop.
    struct PipedBackend;

    impl SpeechBackend for PipedBackend {
        fn start(&mut self) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    let store = PersistentStore::open(store_path)?;
    let (mut engine, _events_tx, _events_rx, notify_rx) = build_engine(store);
    engine.set_mode(Mode::Voice);

    let (rec_tx, rec_rx) = unbounded();
    let mut recognizer = PhraseRecognizer::new(PipedBackend, config.phrase.text.clone(), rec_tx);
    recognizer.start();

    let stdin = std::io::stdin();
    let mut total_matches = 0u64;
    for line in stdin.lock().lines() {
        let line = line?;
        recognizer.handle_signal(BackendSignal::Segment {
            text: line,
            is_final: true,
        });

        // Apply each segment's matches as sequential increments
        while let Ok(event) = rec_rx.try_recv() {
            match event {
                RecognitionEvent::Matches(n) => {
                    total_matches += n;
                    for _ in 0..n {
                        engine.increment()?;
                    }
                }
                RecognitionEvent::Stopped => {}
                RecognitionEvent::Error(e) => return Err(e.into()),
            }
        }
        render_notifications(&notify_rx);
    }
    recognizer.stop();

    println!(
        "✓ Counted {} repetition(s); voice counter at {}",
        total_matches,
        engine.store().counter(Mode::Voice).count
    );
    Ok(())
}

fn cmd_status(store_path: &PathBuf) -> Result<()> {
    let store = PersistentStore::open(store_path)?;

    for mode in [Mode::Voice, Mode::Silent] {
        let counter = store.counter(mode);
        match counter.sub_mode {
            SubMode::Down => println!(
                "{:<6} {:>6} remaining of {} (down)",
                mode.as_str(),
                counter.count,
                counter.target
            ),
            SubMode::Timer => println!(
                "{:<6} {:>6} ({} min timer sub-mode)",
                mode.as_str(),
                counter.count,
                counter.timer_duration
            ),
            SubMode::Up => println!("{:<6} {:>6} (up)", mode.as_str(), counter.count),
        }
    }

    let today = chrono::Local::now().date_naive();
    let tally = store.history().get(&today).copied().unwrap_or_default();
    println!("today  voice {} / silent {}", tally.voice, tally.silent);

    let total = store.total_count();
    println!("lifetime total: {}", total);

    match milestone::progress(total)
        .into_iter()
        .find(|&(_, unlocked)| !unlocked)
    {
        Some((next, _)) => println!("next milestone: {} ({} to go)", next, next - total),
        None => println!("all milestones unlocked"),
    }

    Ok(())
}

fn cmd_reset(store_path: &PathBuf, mode: &str) -> Result<()> {
    let mode = parse_mode(mode)?;
    let store = PersistentStore::open(store_path)?;
    let (mut engine, _events_tx, _events_rx, notify_rx) = build_engine(store);

    engine.set_mode(mode);
    engine.reset()?;
    render_notifications(&notify_rx);

    println!(
        "✓ Reset {} counter to {}",
        mode.as_str(),
        engine.store().counter(mode).count
    );
    Ok(())
}

fn cmd_stats(store_path: &PathBuf, range: &str) -> Result<()> {
    let range = parse_range(range)?;
    let store = PersistentStore::open(store_path)?;
    let today = chrono::Local::now().date_naive();

    let summary = summarize(store.history(), range, today);

    println!("{:<10} {:>8} {:>8}", "", "voice", "silent");
    for bucket in &summary.buckets {
        println!(
            "{:<10} {:>8} {:>8}",
            bucket.label, bucket.voice, bucket.silent
        );
    }
    println!(
        "{:<10} {:>8} {:>8}   total {}",
        "sum", summary.voice, summary.silent,
        summary.total()
    );

    let lifetime = store.total_count();
    println!();
    println!("milestones (lifetime total {}):", lifetime);
    for (threshold, unlocked) in milestone::progress(lifetime) {
        let marker = if unlocked { "★" } else { "·" };
        println!("  {} {}", marker, threshold);
    }

    Ok(())
}

fn cmd_export(store_path: &PathBuf, out: &PathBuf) -> Result<()> {
    let store = PersistentStore::open(store_path)?;
    let rows = history::export_csv(store.history(), out)?;
    println!("✓ Exported {} day(s) to {}", rows, out.display());
    Ok(())
}

fn cmd_set(
    store_path: &PathBuf,
    mode: &str,
    sub_mode: Option<String>,
    target: Option<u64>,
    timer_duration: Option<u64>,
) -> Result<()> {
    let mode = parse_mode(mode)?;
    let mut store = PersistentStore::open(store_path)?;

    let mut counter = store.counter(mode).clone();
    if let Some(s) = sub_mode {
        counter.sub_mode = parse_sub_mode(&s)?;
    }
    if let Some(t) = target {
        if t == 0 {
            return Err(Error::Config("target must be positive".into()));
        }
        counter.target = t;
    }
    if let Some(d) = timer_duration {
        if d == 0 {
            return Err(Error::Config("timer duration must be positive".into()));
        }
        counter.timer_duration = d;
    }
    store.set_counter(mode, counter)?;

    let counter = store.counter(mode);
    println!(
        "✓ {} counter: sub-mode {:?}, target {}, timer {} min",
        mode.as_str(),
        counter.sub_mode,
        counter.target,
        counter.timer_duration
    );
    Ok(())
}

fn cmd_reminder(
    store_path: &PathBuf,
    enable: bool,
    disable: bool,
    interval: Option<u64>,
    sound: Option<String>,
) -> Result<()> {
    let mut store = PersistentStore::open(store_path)?;

    let mut settings = store.settings().clone();
    if enable {
        settings.reminder_enabled = true;
    }
    if disable {
        settings.reminder_enabled = false;
    }
    if let Some(i) = interval {
        if i == 0 {
            return Err(Error::Config("reminder interval must be positive".into()));
        }
        settings.reminder_interval = i;
    }
    if let Some(s) = sound {
        settings.reminder_sound = s;
    }
    store.set_settings(settings)?;

    let settings = store.settings();
    println!(
        "✓ Reminders {} every {} counts ({})",
        if settings.reminder_enabled {
            "on"
        } else {
            "off"
        },
        settings.reminder_interval,
        settings.reminder_sound
    );
    Ok(())
}

fn cmd_session(store_path: &PathBuf, mode: &str, minutes: Option<u64>) -> Result<()> {
    let mode = parse_mode(mode)?;
    let store = PersistentStore::open(store_path)?;
    let (mut engine, events_tx, events_rx, notify_rx) = build_engine(store);

    engine.set_mode(mode);

    // Start the countdown when asked for explicitly, or when the counter
    // is configured for timer sub-mode (minutes from its configuration)
    let counter = engine.store().counter(mode);
    let timer_minutes = minutes.or_else(|| {
        (counter.sub_mode == SubMode::Timer).then(|| counter.timer_duration)
    });
    if let Some(m) = timer_minutes {
        engine.start_timer(m * 60);
        println!("Session started: {} minute countdown", m);
    } else {
        println!("Session started");
    }
    println!("Enter = tally, r = reset, q = quit");

    // Stdin commands feed the same queue as ticker events, so everything
    // the engine sees is serialized
    let (quit_tx, quit_rx) = crossbeam_channel::bounded::<()>(1);
    let stdin_tx = events_tx.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            match line.trim() {
                "" => {
                    if stdin_tx.send(EngineEvent::Increment).is_err() {
                        break;
                    }
                }
                "r" => {
                    if stdin_tx.send(EngineEvent::Reset).is_err() {
                        break;
                    }
                }
                "q" => break,
                other => println!("(unrecognized: {:?})", other),
            }
        }
        let _ = quit_tx.send(());
    });

    loop {
        select! {
            recv(events_rx) -> event => {
                match event {
                    Ok(event) => engine.handle(event)?,
                    Err(_) => break,
                }
                if render_notifications(&notify_rx) {
                    // Countdown exhausted; the session is over
                    break;
                }
            }
            recv(quit_rx) -> _ => {
                // Commands sent before the quit are already queued;
                // apply them so nothing typed is lost
                while let Ok(event) = events_rx.try_recv() {
                    engine.handle(event)?;
                }
                render_notifications(&notify_rx);
                break;
            }
        }
    }

    let store = engine.into_store();
    println!(
        "Session ended; {} counter at {}",
        mode.as_str(),
        store.counter(mode).count
    );
    Ok(())
}
