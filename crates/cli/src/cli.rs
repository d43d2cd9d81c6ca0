use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "farmerlink")]
#[command(about = "Manage your FarmerLink profile from the terminal", long_about = None)]
pub struct Cli {
    /// Account email; required by every command that talks to the backend.
    #[arg(long, global = true, env = "FARMERLINK_EMAIL")]
    pub email: Option<String>,

    /// Account password. Prompted for when absent.
    #[arg(long, global = true, env = "FARMERLINK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show or edit profile details
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Manage the profile picture
    #[command(subcommand)]
    Avatar(AvatarCommand),
    /// Account settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Get crop suggestions for a soil sample
    Recommend(RecommendArgs),
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    Show,
    Update {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        full_name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AvatarCommand {
    Upload { file: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Change the account email; a confirmation mail is sent to the new address
    Email { address: String },
    /// Change the password
    Password,
    /// Delete the account and sign out
    DeleteAccount {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct RecommendArgs {
    /// Photo of the soil sample
    #[arg(conflicts_with_all = ["nitrogen", "phosphorus", "potassium", "ph", "location"])]
    pub image: Option<PathBuf>,

    #[arg(long, requires_all = ["phosphorus", "potassium", "ph", "location"])]
    pub nitrogen: Option<f64>,
    #[arg(long)]
    pub phosphorus: Option<f64>,
    #[arg(long)]
    pub potassium: Option<f64>,
    #[arg(long)]
    pub ph: Option<f64>,
    #[arg(long)]
    pub location: Option<String>,
}
