use std::sync::Arc;

use anyhow::Result;
use client_core::{
    doctor_console::token_chip, sign_in, ConsoleError, ConsoleEvent, ConsoleState, DoctorConsole,
    DoctorSessionStore, HospitalClient, Route, Timings,
};
use shared::protocol::DoctorQueueStats;
use storage::Storage;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::Input;

pub async fn login(client: &HospitalClient, storage: &Storage, name: &str) {
    match sign_in(client, storage, name).await {
        Ok(identity) => {
            print!("Signed in as {}", identity.name);
            if let Some(specialization) = &identity.specialization {
                print!(", {specialization}");
            }
            println!(". Run `kiosk doctor console` to start calling patients.");
        }
        Err(err) => println!("{err}"),
    }
}

pub async fn sign_out(storage: &Storage) -> Result<()> {
    DoctorSessionStore::clear(storage).await?;
    println!("Signed out.");
    Ok(())
}

pub async fn console(
    client: Arc<HospitalClient>,
    storage: Storage,
    timings: Timings,
    input: &mut Input,
) -> Result<()> {
    let console = match DoctorConsole::initialize(client, Arc::new(storage), timings).await {
        Ok(console) => console,
        Err(err) => {
            println!("{err}");
            if err.redirect() == Some(Route::DoctorLogin) {
                println!("Sign in first with `kiosk doctor login <name>`.");
            }
            return Ok(());
        }
    };
    let mut events = console.subscribe_events();

    let identity = console.identity();
    println!(
        "\n{} | {} | queue {}",
        identity.name,
        identity
            .department_name
            .as_deref()
            .or(identity.specialization.as_deref())
            .unwrap_or("General"),
        console.queue_date()
    );
    println!(
        "Commands: [n] call next  [s] start  [k] skip  [e] end  [r] refresh  [o] sign out  [q] quit"
    );
    if let Some(stats) = console.stats().await {
        print_stats(&stats);
    }
    print_state(&console.state().await);

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    console.teardown().await;
                    return Ok(());
                };
                if line.trim() == "q" {
                    console.teardown().await;
                    return Ok(());
                }
                handle_command(&console, line.trim()).await;
            }
            event = events.recv() => match event {
                Ok(ConsoleEvent::Navigate(_)) => {
                    println!("Signed out.");
                    return Ok(());
                }
                Ok(ConsoleEvent::StateChanged(state)) => print_state(&state),
                Ok(ConsoleEvent::StatsUpdated(stats)) => print_stats(&stats),
                Ok(ConsoleEvent::Error(message)) => println!("! {message}"),
                Ok(ConsoleEvent::BusyChanged(_)) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "kiosk: missed console events"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn handle_command(console: &Arc<DoctorConsole>, command: &str) {
    let result = match command {
        "" => Ok(()),
        "n" => console.call_next().await.map(|_| ()),
        "s" => console.start_consultation().await,
        "k" => console.skip().await,
        "e" => console.end_consultation().await,
        "r" => {
            if console.refresh_stats().await.is_none() {
                println!("Queue stats are unavailable right now.");
            }
            Ok(())
        }
        "o" => {
            console.sign_out().await;
            Ok(())
        }
        other => {
            println!("Unknown command `{other}`");
            Ok(())
        }
    };
    match result {
        // Reported through the event stream.
        Ok(()) | Err(ConsoleError::Service { .. }) => {}
        Err(err) => println!("{err}"),
    }
}

fn print_state(state: &ConsoleState) {
    match state {
        ConsoleState::Initializing => println!("Starting console..."),
        ConsoleState::CallNext => {
            println!("No patient called. Press [n] to call the next patient.")
        }
        ConsoleState::Ready(patient) => {
            println!("Token #{} {}", patient.token_number, patient.name);
            if let Some(age) = patient.age {
                println!("  Age: {age}");
            }
            if let Some(contact) = &patient.contact {
                println!("  Contact: {contact}");
            }
            if let Some(symptoms) = &patient.symptoms {
                println!("  Symptoms: {symptoms}");
            }
            println!("Press [s] to start the consultation or [k] if the patient is not present.");
        }
        ConsoleState::Consulting(patient) => {
            println!(
                "In consultation with #{} {}. Press [e] to end it.",
                patient.token_number, patient.name
            );
        }
    }
}

fn print_stats(stats: &DoctorQueueStats) {
    println!(
        "Waiting: {} | Present: {} | Skipped: {}",
        stats.counts.waiting, stats.counts.present, stats.counts.skipped
    );
    if !stats.next_waiting.is_empty() {
        let chips: Vec<String> = stats.next_waiting.iter().map(token_chip).collect();
        println!("Up next: {}", chips.join("  "));
    }
}
