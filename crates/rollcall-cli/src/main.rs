use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new person from the live camera
    Enroll {
        /// Person ID (e.g., employee number)
        id: String,
        /// Full name
        name: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        department: String,
        /// Shift start, HH:MM
        #[arg(long, default_value = "09:00")]
        shift_start: String,
        /// Shift end, HH:MM
        #[arg(long, default_value = "18:00")]
        shift_end: String,
    },
    /// Update an enrolled person's details (embedding is kept)
    Update {
        /// Person ID
        id: String,
        /// Full name
        name: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        department: String,
        /// Shift start, HH:MM
        #[arg(long, default_value = "09:00")]
        shift_start: String,
        /// Shift end, HH:MM
        #[arg(long, default_value = "18:00")]
        shift_end: String,
    },
    /// List enrolled persons
    List,
    /// Remove an enrolled person
    Remove {
        /// Person ID to remove
        id: String,
    },
    /// Show today's attendance
    Today,
    /// Show recent raw detection logs
    Logs {
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Attendance report for a date range (YYYY-MM-DD)
    Report {
        start_date: String,
        end_date: String,
        /// Restrict to one person
        #[arg(long, default_value = "")]
        person: String,
    },
    /// Punctuality statistics for a person
    Stats {
        /// Person ID
        id: String,
    },
    /// Export today's attendance as CSV (written on the daemon host)
    Export {
        /// Output path
        path: String,
    },
    /// Show daemon status
    Status,
    /// List available cameras (no daemon needed)
    Cameras,
}

// The async proxy is generated from this trait; method names map to the
// daemon's PascalCase D-Bus members.
#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn enroll(
        &self,
        person_id: &str,
        name: &str,
        email: &str,
        department: &str,
        shift_start: &str,
        shift_end: &str,
    ) -> zbus::Result<String>;
    async fn remove_person(&self, person_id: &str) -> zbus::Result<bool>;
    async fn update_person(
        &self,
        person_id: &str,
        name: &str,
        email: &str,
        department: &str,
        shift_start: &str,
        shift_end: &str,
    ) -> zbus::Result<bool>;
    async fn list_persons(&self) -> zbus::Result<String>;
    async fn today(&self) -> zbus::Result<String>;
    async fn recent_logs(&self, limit: u32) -> zbus::Result<String>;
    async fn report(
        &self,
        start_date: &str,
        end_date: &str,
        person_id: &str,
    ) -> zbus::Result<String>;
    async fn person_stats(&self, person_id: &str) -> zbus::Result<String>;
    async fn export_csv(&self, path: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Camera enumeration works without the daemon.
    if let Commands::Cameras = cli.command {
        let devices = rollcall_hw::Camera::list_devices();
        if devices.is_empty() {
            println!("No video capture devices found");
        }
        for d in devices {
            println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
        }
        return Ok(());
    }

    let conn = zbus::Connection::system()
        .await
        .context("failed to connect to the system bus — is rollcalld running?")?;
    let proxy = RollcallProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll {
            id,
            name,
            email,
            department,
            shift_start,
            shift_end,
        } => {
            println!("Enrolling {name} — look at the camera...");
            let reply = proxy
                .enroll(&id, &name, &email, &department, &shift_start, &shift_end)
                .await?;
            let v: serde_json::Value = serde_json::from_str(&reply)?;
            println!(
                "Enrolled {} ({}) — capture quality {:.2}",
                v["name"].as_str().unwrap_or(&name),
                v["person_id"].as_str().unwrap_or(&id),
                v["quality"].as_f64().unwrap_or(0.0)
            );
        }
        Commands::List => {
            let reply = proxy.list_persons().await?;
            let persons: serde_json::Value = serde_json::from_str(&reply)?;
            let list = persons.as_array().cloned().unwrap_or_default();
            if list.is_empty() {
                println!("No persons enrolled");
            }
            for p in list {
                println!(
                    "{:<12} {:<24} {:<20} shift {}-{}",
                    p["person_id"].as_str().unwrap_or(""),
                    p["name"].as_str().unwrap_or(""),
                    p["department"].as_str().unwrap_or("-"),
                    p["shift_start"].as_str().unwrap_or(""),
                    p["shift_end"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Update {
            id,
            name,
            email,
            department,
            shift_start,
            shift_end,
        } => {
            if proxy
                .update_person(&id, &name, &email, &department, &shift_start, &shift_end)
                .await?
            {
                println!("Updated {id}");
            } else {
                println!("No such person: {id}");
            }
        }
        Commands::Remove { id } => {
            if proxy.remove_person(&id).await? {
                println!("Removed {id}");
            } else {
                println!("No such person: {id}");
            }
        }
        Commands::Today => {
            let reply = proxy.today().await?;
            let rows: serde_json::Value = serde_json::from_str(&reply)?;
            let list = rows.as_array().cloned().unwrap_or_default();
            if list.is_empty() {
                println!("Nobody recorded today");
            }
            for r in list {
                println!(
                    "{:<12} {:<24} in {}  last seen {}  {}",
                    r["person_id"].as_str().unwrap_or(""),
                    r["name"].as_str().unwrap_or(""),
                    r["arrival_time"].as_str().unwrap_or("-"),
                    r["leaving_time"].as_str().unwrap_or("-"),
                    r["status"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Logs { limit } => {
            let reply = proxy.recent_logs(limit).await?;
            let rows: serde_json::Value = serde_json::from_str(&reply)?;
            for r in rows.as_array().cloned().unwrap_or_default() {
                println!(
                    "{} {}  {:<12} {}",
                    r["date"].as_str().unwrap_or(""),
                    r["time"].as_str().unwrap_or(""),
                    r["person_id"].as_str().unwrap_or(""),
                    r["name"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Report {
            start_date,
            end_date,
            person,
        } => {
            let reply = proxy.report(&start_date, &end_date, &person).await?;
            let rows: serde_json::Value = serde_json::from_str(&reply)?;
            for r in rows.as_array().cloned().unwrap_or_default() {
                println!(
                    "{}  {:<12} {:<24} in {}  out {}  {}",
                    r["date"].as_str().unwrap_or(""),
                    r["person_id"].as_str().unwrap_or(""),
                    r["name"].as_str().unwrap_or(""),
                    r["arrival_time"].as_str().unwrap_or("-"),
                    r["leaving_time"].as_str().unwrap_or("-"),
                    r["status"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Stats { id } => {
            let reply = proxy.person_stats(&id).await?;
            let s: serde_json::Value = serde_json::from_str(&reply)?;
            println!("{} ({})", s["name"].as_str().unwrap_or(""), id);
            println!("  shift:            {}", s["shift"].as_str().unwrap_or(""));
            println!("  days recorded:    {}", s["total_days"]);
            println!("  late arrivals:    {}", s["late_arrivals"]);
            println!("  early departures: {}", s["early_departures"]);
            println!("  avg hours/day:    {}", s["avg_hours"]);
        }
        Commands::Export { path } => {
            println!("{}", proxy.export_csv(&path).await?);
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            let v: serde_json::Value = serde_json::from_str(&reply)?;
            println!("rollcalld {}", v["version"].as_str().unwrap_or("?"));
            println!("  camera:            {}", v["camera"].as_str().unwrap_or("?"));
            println!("  enrolled persons:  {}", v["enrolled_persons"]);
            println!("  present today:     {}", v["present_today"]);
            println!("  unknown sightings: {}", v["unknown_sightings"]);
            println!("  key fingerprint:   {}", v["key_fingerprint"].as_str().unwrap_or("?"));
            println!("  uptime:            {}s", v["uptime_secs"]);
        }
        Commands::Cameras => unreachable!("handled above"),
    }

    Ok(())
}
