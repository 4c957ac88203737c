use course_core::model::{ProgramId, UserId};
use services::{AppServices, Clock, CourseServiceError, NewModule, NewProgram, NewVideo};
use storage::repository::StorageError;
use tracing_subscriber::EnvFilter;

mod args;
mod config;

use args::{Args, ArgsError, Command, print_usage};
use config::Config;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Creates a small two-module program unless one with `program_id` exists.
async fn seed(services: &AppServices, program_id: ProgramId) -> Result<(), CourseServiceError> {
    let courses = services.courses();
    if courses.get_program(&program_id).await?.is_some() {
        tracing::info!(%program_id, "program already seeded");
        return Ok(());
    }

    let pid = courses
        .create_program(NewProgram {
            id: Some(program_id),
            name: "Foundations".into(),
            description: Some("Nutrition and hydration basics".into()),
        })
        .await?;

    let lessons: [(&str, &[(&str, u32)]); 2] = [
        (
            "Nutrition",
            &[
                ("Reading labels", 420),
                ("Balanced plates", 510),
                ("Meal timing", 380),
                ("Snacks", 300),
            ],
        ),
        ("Hydration", &[("Daily targets", 260), ("Electrolytes", 340)]),
    ];

    for (order, (title, videos)) in (0..).zip(lessons) {
        let (module_id, _) = courses
            .add_module(
                &pid,
                NewModule {
                    id: None,
                    title: title.into(),
                    description: None,
                    display_order: order,
                },
            )
            .await?;
        for (video_order, (video_title, duration_secs)) in (0..).zip(videos.iter()) {
            courses
                .add_video(
                    &pid,
                    &module_id,
                    NewVideo {
                        title: (*video_title).into(),
                        duration_secs: *duration_secs,
                        display_order: video_order,
                        ..NewVideo::default()
                    },
                )
                .await?;
        }
    }
    tracing::info!(program_id = %pid, "seeded demo program");
    Ok(())
}

async fn show(
    services: &AppServices,
    user_id: &UserId,
    program_id: &ProgramId,
) -> Result<(), Box<dyn std::error::Error>> {
    let program = services
        .courses()
        .get_program(program_id)
        .await?
        .ok_or(StorageError::NotFound)?;
    let record = services.progress().get_progress(user_id, program_id).await?;

    println!("{} ({})", program.name(), program.id());
    for module in program.modules_in_order() {
        let pct = record
            .as_ref()
            .and_then(|r| r.module_progress().get(module.id()).copied())
            .unwrap_or(0);
        println!("  [{pct:>3}%] {} ({})", module.title(), module.id());
        for video in module.videos_in_order() {
            let done = record
                .as_ref()
                .is_some_and(|r| r.completed_videos().contains(module.id(), video.id()));
            let mark = if done { "x" } else { " " };
            println!("      [{mark}] {} ({})", video.title(), video.id());
        }
    }
    match record {
        Some(record) => println!(
            "overall: {}% ({})",
            record.program_progress(),
            record.program_status()
        ),
        None => println!("overall: 0% (no progress recorded)"),
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let parsed = match Args::parse(std::env::args().skip(1)) {
        Ok(parsed) => parsed,
        Err(ArgsError::HelpRequested) => {
            print_usage();
            return Ok(());
        }
        Err(err) => {
            eprintln!("{err}");
            print_usage();
            return Err(err.into());
        }
    };

    let config = Config::from_env()?;
    let settings = config.sqlite_settings();
    let db_url = parsed.db_url.unwrap_or(config.db_url);
    let user_id = UserId::new(parsed.user.unwrap_or(config.user_id));

    let services = AppServices::new_sqlite(&db_url, settings, Clock::System).await?;
    tracing::debug!(%db_url, %user_id, "services ready");

    match parsed.command {
        Command::Programs => {
            for program in services.courses().list_programs(100).await? {
                println!(
                    "{}\t{}\t{} videos",
                    program.id(),
                    program.name(),
                    program.total_videos()
                );
            }
        }
        Command::Seed { program } => seed(&services, program).await?,
        Command::Show { program } => show(&services, &user_id, &program).await?,
        Command::Toggle {
            program,
            module,
            video,
        } => {
            let mut tracker = services.tracker(user_id, program).await?;
            let record = tracker.toggle(&module, &video).await?;
            print_json(record)?;
        }
        Command::Watch {
            program,
            module,
            video,
            position_secs,
        } => {
            let marked = services
                .progress()
                .record_playback(
                    &user_id,
                    &program,
                    &module,
                    &video,
                    position_secs,
                    config.watch_threshold,
                )
                .await?;
            match marked {
                Some(record) => print_json(&record)?,
                None => println!("no change"),
            }
        }
        Command::DeleteVideo {
            program,
            module,
            video,
        } => {
            let report = services
                .courses()
                .delete_video(&program, &module, &video)
                .await?;
            print_json(&report)?;
        }
        Command::DeleteModule { program, module } => {
            let report = services.courses().delete_module(&program, &module).await?;
            print_json(&report)?;
        }
        Command::Refresh { program } => {
            let record = services.progress().refresh(&user_id, &program).await?;
            print_json(&record)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        tracing::error!(error = %err, "command failed");
        std::process::exit(2);
    }
}
