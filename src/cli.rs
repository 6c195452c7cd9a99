use std::{
    env,
    io::{self, BufRead, Write},
    sync::Arc,
};

use anyhow::{Context, bail};
use chrono::{Datelike, Local};
use tokio::sync::watch;

use chronosync::{
    app::AppContext,
    calendar::Holiday,
    notify::{Notifier, Reminder, TracingNotifier},
};

const USAGE: &str = "Usage: chronosync [--holidays CC [YEAR]] [--countries] [--register EMAIL] \
[--login EMAIL] [--logout] [--calendars] [--remind [--watch]]";

#[derive(Debug, Clone, PartialEq)]
pub enum CliMode {
    Status,
    Holidays { country: String, year: Option<i32> },
    Countries,
    Register(String),
    Login(String),
    Logout,
    Calendars,
    Remind { watch: bool },
}

pub fn parse_cli_mode() -> Result<CliMode, String> {
    parse_args(env::args().skip(1))
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliMode, String> {
    let mut mode = CliMode::Status;
    let mut watch = false;
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--holidays" => {
                let country = args
                    .next()
                    .filter(|c| !c.starts_with("--"))
                    .ok_or_else(|| "--holidays needs a country code".to_string())?;
                let year = match args.next_if(|next| !next.starts_with("--")) {
                    Some(value) => Some(
                        value
                            .parse::<i32>()
                            .map_err(|_| format!("Invalid year '{}'", value))?,
                    ),
                    None => None,
                };
                mode = CliMode::Holidays { country, year };
            }
            "--countries" => mode = CliMode::Countries,
            "--register" | "--login" => {
                let email = args
                    .next()
                    .filter(|e| !e.starts_with("--"))
                    .ok_or_else(|| format!("{} needs an email address", arg))?;
                mode = if arg == "--register" { CliMode::Register(email) } else { CliMode::Login(email) };
            }
            "--logout" => mode = CliMode::Logout,
            "--calendars" => mode = CliMode::Calendars,
            "--remind" => mode = CliMode::Remind { watch: false },
            "--watch" => watch = true,
            "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => return Err(format!("Unknown argument: {}", arg)),
        }
    }

    match mode {
        CliMode::Remind { .. } => Ok(CliMode::Remind { watch }),
        _ if watch => Err("--watch only applies to --remind".to_string()),
        other => Ok(other),
    }
}

pub fn usage() -> &'static str {
    USAGE
}

pub async fn run(ctx: &AppContext, mode: CliMode) -> anyhow::Result<()> {
    match mode {
        CliMode::Status => {
            match ctx.current_session() {
                Some(session) => println!("Signed in as {} ({})", session.email, session.user_id),
                None => println!("Not signed in. {}", USAGE),
            }
            Ok(())
        }
        CliMode::Holidays { country, year } => {
            let year = year.unwrap_or_else(|| Local::now().year());
            let holidays = ctx.holidays.get_public_holidays(&country, year, false).await?;
            print!("{}", format_holidays(&country.to_uppercase(), year, &holidays));
            Ok(())
        }
        CliMode::Countries => {
            for country in ctx.holidays.get_countries(false).await? {
                println!("{}  {}", country.code, country.name);
            }
            Ok(())
        }
        CliMode::Register(email) => {
            let password = read_password()?;
            let session = ctx.register(&email, &password).await?;
            println!("Registered and signed in as {}", session.email);
            Ok(())
        }
        CliMode::Login(email) => {
            let password = read_password()?;
            match ctx.login_offline(&email, &password)? {
                Some(session) => {
                    println!("Signed in as {}", session.email);
                    Ok(())
                }
                None => bail!("Unknown account or wrong password"),
            }
        }
        CliMode::Logout => {
            ctx.logout()?;
            println!("Signed out");
            Ok(())
        }
        CliMode::Calendars => {
            let session = ctx.current_session().context("Not signed in, use --login first")?;
            let calendars = ctx.calendars.get_user_calendars(&session, false).await?;
            if calendars.is_empty() {
                println!("No calendars.");
            }
            for calendar in calendars {
                let role = if calendar.is_owner(&session.user_id) { "owner" } else { "shared" };
                println!("{}  [{}]  {} events", calendar.title, role, calendar.holidays.len());
                for holiday in calendar.holidays_sorted() {
                    println!("    {}  {}", &holiday.date.iso.chars().take(10).collect::<String>(), holiday.name);
                }
            }
            Ok(())
        }
        CliMode::Remind { watch } => run_reminders(ctx, watch).await,
    }
}

struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&self, reminder: &Reminder) {
        TracingNotifier.notify(reminder);
        println!("[{}] {}: {}", reminder.date, reminder.title, reminder.body);
    }
}

async fn run_reminders(ctx: &AppContext, keep_watching: bool) -> anyhow::Result<()> {
    if !ctx.config.notifications.enabled {
        println!("Reminders are disabled in the config file.");
        return Ok(());
    }
    let worker = ctx.reminder_worker(Arc::new(StdoutNotifier));

    if !keep_watching {
        let sent = worker.run_once().await?;
        println!("{} reminder(s) for tomorrow", sent);
        return Ok(());
    }

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received");
            let _ = tx.send(true);
        }
    });
    worker.run(rx).await;
    Ok(())
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("Failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

fn format_holidays(country: &str, year: i32, holidays: &[Holiday]) -> String {
    let mut lines = vec![format!("Public holidays – {} {}", country, year), String::new()];
    if holidays.is_empty() {
        lines.push("No holidays found.".to_string());
    }
    for holiday in holidays {
        let date = holiday
            .local_date()
            .map(|d| d.format("%a %d %b").to_string())
            .unwrap_or_else(|| holiday.date.iso.clone());
        lines.push(format!("{:<11} {}", date, holiday.name));
    }
    lines.push(String::new());
    lines.join("\n")
}
