//! One-shot commands over the backend's REST endpoints.

use anyhow::Result;

use crate::backend::{ActionResponse, BackendClient};
use crate::config::Config;

/// Prints current joint positions and end-effector pose.
pub async fn position(config: &Config) -> Result<()> {
    let client = BackendClient::from_config(config)?;
    let (joints, pose) = tokio::try_join!(client.joint_positions(), client.ee_position())?;

    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "joint_positions": joints,
        "ee_position": pose,
    }))?);
    Ok(())
}

/// Triggers the emergency stop.
pub async fn emergency_stop(config: &Config) -> Result<()> {
    let response = BackendClient::from_config(config)?.emergency_stop().await?;
    report("Emergency stop sent", &response);
    Ok(())
}

/// Moves the arm to its home pose.
pub async fn home(config: &Config) -> Result<()> {
    let response = BackendClient::from_config(config)?.home().await?;
    report("Homing", &response);
    Ok(())
}

/// Lists stored programs, and saved positions when `with_positions` is set.
pub async fn list_programs(config: &Config, with_positions: bool) -> Result<()> {
    let client = BackendClient::from_config(config)?;

    let programs = client.programs().await?;
    if programs.is_empty() {
        println!("No programs stored");
    }
    for program in &programs {
        println!(
            "{}  {} ({} steps)",
            program.id,
            program.name,
            program.steps.len()
        );
    }

    if with_positions {
        let positions = client.saved_positions().await?;
        println!();
        if positions.is_empty() {
            println!("No saved positions");
        }
        for saved in &positions {
            let j = &saved.joint_positions;
            println!(
                "{}  {}  [{:.1}, {:.1}, {:.1}, {:.1}, {:.1}, {:.1}]",
                saved.id,
                saved.name,
                j.base_rotation,
                j.shoulder_rotation,
                j.prismatic_extension,
                j.elbow_rotation,
                j.elbow2_rotation,
                j.end_effector_rotation
            );
        }
    }
    Ok(())
}

/// Prints one program with its steps.
pub async fn show_program(config: &Config, program_id: &str) -> Result<()> {
    let program = BackendClient::from_config(config)?
        .program(program_id)
        .await?;

    println!("{} ({})", program.name, program.id);
    if let Some(description) = program.description.as_deref().filter(|d| !d.is_empty()) {
        println!("{description}");
    }
    for (index, step) in program.steps.iter().enumerate() {
        println!("{:>3}. {} {}", index + 1, step.kind, step.data);
    }
    Ok(())
}

/// Starts a stored program. Use `watch --type program_execution` to follow it.
pub async fn run_program(config: &Config, program_id: &str) -> Result<()> {
    let response = BackendClient::from_config(config)?
        .execute_program(program_id)
        .await?;
    report(&format!("Program {program_id} started"), &response);
    Ok(())
}

fn report(action: &str, response: &ActionResponse) {
    match &response.message {
        Some(message) => println!("{action}: {message}"),
        None => println!("{action}"),
    }
}
