/*!
 # FX Runner

 A Rust library for supervising a single FXServer game-server process.

 ## Overview

 FX Runner provides functionality to:
 - Validate the server cfg and spawn the server with a fresh session token
 - Send console commands over stdin with injection-safe argument encoding
 - Decode the structured event stream the server writes on file descriptor 3
 - Kill and restart the server with a player-facing shutdown notice
 - Back off respawns while the server keeps failing to bind its port
 - Keep a bounded history of past server processes

 ## Basic Usage

 ```no_run
 use fxrunner::{Collaborators, CommandAuthor, Result, Supervisor};
 use serde_json::json;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Create a supervisor from a config file
     let supervisor = Supervisor::from_config_file("fxrunner.json", Collaborators::detached())?;

     // Validate the cfg and start the server
     supervisor.spawn(true).await?;

     // Talk to the server console
     let admin = CommandAuthor::from("alice");
     supervisor
         .send_command("say", &[json!("Restarting soon")], &admin)
         .await?;

     // Restart with a shutdown notice, then stop for good
     supervisor.restart_server("scheduled restart", &admin).await?;
     supervisor.kill_server("maintenance", &admin, false).await?;

     println!("History: {:?}", supervisor.history());
     Ok(())
 }
 ```

 ## Features

 - **Process Supervision**: Spawn, kill and restart one server process
 - **Event Stream**: Route structured events to pluggable collaborators
 - **Configuration**: Configure the supervisor through a JSON config file
 - **Error Handling**: One error type with operator-readable messages
 - **Async Support**: Full async/await support on tokio

 ## License

 This project is licensed under the terms in the LICENSE file.
*/

pub mod collaborators;
pub mod config;
pub mod error;
pub mod server;
pub mod supervisor;
pub mod transport;

pub use collaborators::Collaborators;
pub use config::SupervisorConfig;
pub use error::{Error, Result};
pub use server::{ChildProcessHandle, ChildProcessRecord, ChildProcessState};
pub use supervisor::{CommandAuthor, Supervisor};
