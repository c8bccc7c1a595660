use std::sync::Arc;

use anyhow::Result;
use client_core::{
    queue_tracker::{project_progress, MilestoneState, ProgressState},
    registration::HandoffPhase,
    HandoffBundle, HospitalClient, QueueTracker, RegistrationError, RegistrationEvent,
    RegistrationFlow, Route, StepInput, StepView, Timings, TrackerError, TrackerEvent,
};
use shared::{
    domain::{QueueStatus, RegistrationStep},
    protocol::QueueStatusSnapshot,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::Input;

pub async fn register(
    client: Arc<HospitalClient>,
    timings: Timings,
    input: &mut Input,
) -> Result<Option<HandoffBundle>> {
    let flow = RegistrationFlow::new(client, timings);
    let mut events = flow.subscribe_events();
    let mut view = StepView::Phone;
    println!("Type `restart` at any prompt to start over.");

    loop {
        if let StepView::Handoff {
            token_number,
            patient_name,
            department,
            ..
        } = &view
        {
            let Some(token_number) = token_number else {
                println!("Registration finished but no token was issued. Please ask at the desk.");
                flow.teardown().await;
                return Ok(None);
            };
            println!(
                "Registration complete{}{}. Your token is #{token_number}.",
                patient_name
                    .as_deref()
                    .map(|name| format!(" for {name}"))
                    .unwrap_or_default(),
                department
                    .as_deref()
                    .map(|department| format!(" ({department})"))
                    .unwrap_or_default(),
            );
            let bundle = await_handoff(&mut events).await;
            flow.teardown().await;
            return Ok(bundle);
        }

        print_step(&view, &flow.current_step().await);
        let Some(line) = input.next_line().await? else {
            flow.teardown().await;
            return Ok(None);
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("restart") {
            flow.reset().await;
            view = StepView::Phone;
            continue;
        }
        let Some(step_input) = parse_step_input(&view, line) else {
            continue;
        };

        match flow.submit(step_input).await {
            Ok(next) => view = next,
            Err(RegistrationError::Superseded) => {}
            Err(err) => {
                println!("{err}");
                view = flow.current_view().await;
            }
        }
    }
}

async fn await_handoff(
    events: &mut broadcast::Receiver<RegistrationEvent>,
) -> Option<HandoffBundle> {
    loop {
        match events.recv().await {
            Ok(RegistrationEvent::Navigate(Route::QueueTracker(bundle))) => return Some(bundle),
            Ok(RegistrationEvent::HandoffPhaseChanged(HandoffPhase::TokenRevealed)) => {
                println!("Opening your queue status...");
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return None,
        }
    }
}

fn print_step(view: &StepView, step: &RegistrationStep) {
    if let Some(stage) = step.progress_index() {
        println!("\n[step {} of 6]", stage + 1);
    }
    match view {
        StepView::Phone => println!("Enter your phone number:"),
        StepView::PatientDetails => println!("Enter your full name and age, e.g. `Asha Rao, 34`:"),
        StepView::Symptoms { patient_name } => {
            if let Some(name) = patient_name {
                println!("Welcome, {name}.");
            }
            println!("Describe your symptoms:");
        }
        StepView::Department {
            suggested,
            confidence,
            reasoning,
            departments,
        } => {
            if let Some(suggested) = suggested {
                match confidence {
                    Some(confidence) => println!(
                        "Suggested department: {suggested} ({:.0}% confidence)",
                        confidence * 100.0
                    ),
                    None => println!("Suggested department: {suggested}"),
                }
            }
            for reason in reasoning {
                println!("  - {reason}");
            }
            if !departments.is_empty() {
                println!("Departments: {}", departments.join(", "));
            }
            println!("Press Enter to accept, or type another department:");
        }
        StepView::Doctor { doctors } => {
            for (index, doctor) in doctors.iter().enumerate() {
                match &doctor.specialization {
                    Some(specialization) => {
                        println!("  {}. {} ({specialization})", index + 1, doctor.name)
                    }
                    None => println!("  {}. {}", index + 1, doctor.name),
                }
            }
            println!("Choose a doctor by number:");
        }
        StepView::CreatingVisit => println!("Creating your visit. Press Enter to continue."),
        StepView::Handoff { .. } => {}
        StepView::Unknown { step } => {
            println!("This kiosk cannot show step `{step}`. Press Enter to continue.")
        }
    }
}

fn parse_step_input(view: &StepView, line: &str) -> Option<StepInput> {
    match view {
        StepView::Phone => Some(StepInput::Phone(line.to_string())),
        StepView::PatientDetails => {
            let parsed = line.rsplit_once(',').and_then(|(name, age)| {
                let name = name.trim();
                let age = age.trim().parse::<u32>().ok()?;
                (!name.is_empty()).then(|| StepInput::PatientDetails {
                    full_name: name.to_string(),
                    age,
                })
            });
            if parsed.is_none() {
                println!("Please enter your name and age separated by a comma.");
            }
            parsed
        }
        StepView::Symptoms { .. } => Some(StepInput::Symptoms(line.to_string())),
        StepView::Department { .. } => {
            if line.is_empty() || line.eq_ignore_ascii_case("y") {
                Some(StepInput::ConfirmDepartment)
            } else {
                Some(StepInput::OverrideDepartment(line.to_string()))
            }
        }
        StepView::Doctor { doctors } => {
            let chosen = line
                .parse::<usize>()
                .ok()
                .and_then(|number| number.checked_sub(1))
                .and_then(|index| doctors.get(index));
            match chosen {
                Some(doctor) => Some(StepInput::SelectDoctor(doctor.id)),
                None => {
                    println!("Please choose a number between 1 and {}.", doctors.len());
                    None
                }
            }
        }
        StepView::CreatingVisit | StepView::Handoff { .. } | StepView::Unknown { .. } => {
            Some(StepInput::Empty)
        }
    }
}

pub async fn track(
    client: Arc<HospitalClient>,
    timings: Timings,
    bundle: HandoffBundle,
    alerts: bool,
    input: &mut Input,
) -> Result<()> {
    // A failed first fetch is kept on the tracker and retried by the poller.
    let tracker = match QueueTracker::mount(client, bundle, timings).await {
        Ok(tracker) => tracker,
        Err(err) => {
            println!("{err}");
            if err.redirect() == Some(Route::RegistrationStart) {
                println!("Run `kiosk register` to start a new registration.");
            }
            return Ok(());
        }
    };
    tracker.set_alerts(alerts).await;
    let mut events = tracker.subscribe_events();

    let context = tracker.context();
    println!(
        "\nToken #{} for {}",
        context.token_number,
        context.patient_name.as_deref().unwrap_or("your visit")
    );
    if let Some(doctor_name) = &context.doctor_name {
        println!("Doctor: {doctor_name}");
    }
    println!("Commands: [r] refresh  [c] check in  [a] toggle alerts  [q] leave");
    match tracker.snapshot().await {
        Some(snapshot) => {
            print_status(&snapshot);
            if alerts && snapshot.status == QueueStatus::Called {
                print_tracker_event(TrackerEvent::CalledAlert {
                    token_number: context.token_number,
                });
            }
        }
        None => {
            if let Some(message) = tracker.error().await {
                println!("! {message}");
            }
        }
    }

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    tracker.teardown().await;
                    return Ok(());
                };
                handle_tracker_command(&tracker, line.trim()).await;
            }
            event = events.recv() => match event {
                Ok(TrackerEvent::Navigate(route)) => {
                    info!(?route, "kiosk: leaving queue tracker");
                    tracker.teardown().await;
                    return Ok(());
                }
                Ok(event) => print_tracker_event(event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "kiosk: missed tracker events"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn handle_tracker_command(tracker: &Arc<QueueTracker>, command: &str) {
    let result = match command {
        "" => Ok(()),
        "r" => tracker.refresh().await.map(|_| ()),
        "c" => tracker.check_in().await,
        "a" => {
            let enabled = !tracker.alerts_enabled().await;
            tracker.set_alerts(enabled).await;
            println!("Alerts {}", if enabled { "on" } else { "off" });
            Ok(())
        }
        "q" => {
            tracker.leave().await;
            Ok(())
        }
        other => {
            println!("Unknown command `{other}`");
            Ok(())
        }
    };
    match result {
        // Service failures were already reported through the event stream.
        Ok(()) | Err(TrackerError::Service { .. }) | Err(TrackerError::Superseded) => {}
        Err(err) => println!("{err}"),
    }
}

fn print_tracker_event(event: TrackerEvent) {
    match event {
        TrackerEvent::StatusUpdated(snapshot) => print_status(&snapshot),
        TrackerEvent::RefreshingChanged(true) => println!("Refreshing..."),
        TrackerEvent::CheckingInChanged(true) => println!("Checking in..."),
        TrackerEvent::RefreshingChanged(false) | TrackerEvent::CheckingInChanged(false) => {}
        TrackerEvent::Error(message) => println!("! {message}"),
        TrackerEvent::CalledAlert { token_number } => {
            println!("\x07*** Token #{token_number} has been called! ***")
        }
        TrackerEvent::Completed => println!("Returning to registration shortly..."),
        TrackerEvent::Navigate(_) => {}
    }
}

fn print_status(snapshot: &QueueStatusSnapshot) {
    let mut line = format!("Status: {}", snapshot.status.label());
    if let Some(current) = snapshot.current_token {
        line.push_str(&format!(" | Now serving: #{current}"));
    }
    if let Some(ahead) = snapshot.ahead() {
        line.push_str(&format!(" | Ahead of you: {ahead}"));
    }
    println!("{line}");

    let progress = project_progress(Some(snapshot.status));
    let timeline: Vec<String> = progress
        .milestones
        .iter()
        .map(|milestone| {
            let mark = match milestone.state {
                MilestoneState::Completed => "x",
                MilestoneState::Active => ">",
                MilestoneState::Pending => " ",
            };
            format!("[{mark}] {}", milestone.label)
        })
        .collect();
    println!("{}", timeline.join("  "));
    if progress.state == ProgressState::NoActiveMilestone {
        println!("Your visit is not currently in the queue.");
    }

    if let Some(guidance) = snapshot.guidance() {
        println!("{guidance}");
    }
    if let Some(message) = &snapshot.message {
        println!("{message}");
    }
}
