use std::{path::Path, sync::Arc};

use anyhow::{Context, bail};
use bytes::Bytes;
use dialoguer::{Confirm, Password};
use secrecy::SecretString;
use services::services::{
    avatar::{AvatarFile, UploaderConfig},
    backend::AuthProvider,
    config::BackendConfig,
    notifications::{LogNotifier, Notifier},
    profile::{ProfileFormValues, ProfilePage},
    recommendation::{MockCropAdvisor, RecommendationPage, SoilImage},
    remote_client::BackendClient,
    session::SessionHandle,
    settings::AccountSettings,
};
use tracing::info;
use utils::api::recommendation::{RecommendationReport, SoilParameters};

use crate::{
    cli::{AvatarCommand, Cli, Command, ProfileCommand, RecommendArgs, SettingsCommand},
    progress,
};

/// A file read from disk with its guessed content type.
struct LocalFile {
    name: String,
    content_type: String,
    bytes: Bytes,
}

struct Signed {
    config: BackendConfig,
    client: Arc<BackendClient>,
    session: SessionHandle,
    password: String,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    match cli.command {
        Command::Recommend(args) => recommend(args, notifier).await,
        Command::Profile(cmd) => {
            let signed = sign_in(cli.email, cli.password).await?;
            profile(cmd, signed, notifier).await
        }
        Command::Avatar(AvatarCommand::Upload { file }) => {
            let signed = sign_in(cli.email, cli.password).await?;
            upload_avatar(&file, signed, notifier).await
        }
        Command::Settings(cmd) => {
            let signed = sign_in(cli.email, cli.password).await?;
            settings(cmd, signed, notifier).await
        }
    }
}

async fn sign_in(email: Option<String>, password: Option<String>) -> anyhow::Result<Signed> {
    let Some(email) = email else {
        bail!("--email (or FARMERLINK_EMAIL) is required for this command");
    };
    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt(format!("Password for {email}"))
            .interact()?,
    };

    let config = BackendConfig::from_env()?;
    let client = Arc::new(BackendClient::new(&config)?);
    let session = client
        .sign_in_with_password(&email, &SecretString::from(password.clone()))
        .await
        .context("sign-in failed")?;
    info!(user_id = %session.user_id(), "signed in");

    Ok(Signed {
        config,
        client,
        session: SessionHandle::signed_in(session),
        password,
    })
}

async fn profile(
    cmd: ProfileCommand,
    signed: Signed,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<()> {
    let uploads = UploaderConfig::for_backend(&signed.config);
    let mut page = ProfilePage::new(signed.session, signed.client, notifier, uploads);
    page.refresh().await;

    if let ProfileCommand::Update {
        username,
        full_name,
    } = cmd
    {
        if username.is_none() && full_name.is_none() {
            bail!("nothing to update; pass --username and/or --full-name");
        }
        page.save_values(ProfileFormValues {
            username,
            full_name,
        })
        .await?;
    }

    let card = page.card();
    println!("{} ({})", card.display_name, card.handle);
    if let Some(email) = &card.email {
        println!("  email:  {email}");
    }
    match &card.avatar_url {
        Some(url) => println!("  avatar: {url}"),
        None => println!("  avatar: [{}]", card.initials),
    }
    Ok(())
}

async fn upload_avatar(
    path: &Path,
    signed: Signed,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<()> {
    let file = read_file(path).await?;
    let uploads = UploaderConfig::for_backend(&signed.config);
    let mut page = ProfilePage::new(signed.session, signed.client, notifier, uploads);
    page.refresh().await;

    let (bar, drawing) = progress::follow_upload(page.uploader().subscribe());
    let result = page
        .choose_avatar(AvatarFile {
            name: file.name,
            content_type: file.content_type,
            bytes: file.bytes,
        })
        .await;
    drawing.abort();
    bar.finish_and_clear();

    let uploaded = result?;
    println!("avatar: {}", uploaded.avatar_url);
    Ok(())
}

async fn settings(
    cmd: SettingsCommand,
    signed: Signed,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<()> {
    let auth: Arc<dyn AuthProvider> = signed.client;
    let mut settings = AccountSettings::new(signed.session, auth, notifier);

    match cmd {
        SettingsCommand::Email { address } => {
            settings.email_form_mut().email = address;
            settings.update_email().await?;
        }
        SettingsCommand::Password => {
            let new_password = Password::new().with_prompt("New password").interact()?;
            let confirm_password = Password::new()
                .with_prompt("Confirm new password")
                .interact()?;

            let form = settings.password_form_mut();
            form.current_password = signed.password;
            form.new_password = new_password;
            form.confirm_password = confirm_password;
            settings.update_password().await?;
        }
        SettingsCommand::DeleteAccount { yes } => {
            let confirmed = yes
                || Confirm::new()
                    .with_prompt("This permanently deletes your account. Continue?")
                    .default(false)
                    .interact()?;
            if !confirmed {
                println!("cancelled");
                return Ok(());
            }
            settings.delete_account().await?;
        }
    }
    Ok(())
}

async fn recommend(args: RecommendArgs, notifier: Arc<dyn Notifier>) -> anyhow::Result<()> {
    let mut page = RecommendationPage::new(Arc::new(MockCropAdvisor::default()), notifier);

    let report = match args.image {
        Some(path) => {
            let file = read_file(&path).await?;
            page.select_image(SoilImage {
                name: file.name,
                content_type: file.content_type,
                bytes: file.bytes,
            })?;
            page.analyze_image().await?
        }
        None => {
            let (Some(nitrogen), Some(phosphorus), Some(potassium), Some(ph), Some(location)) = (
                args.nitrogen,
                args.phosphorus,
                args.potassium,
                args.ph,
                args.location,
            ) else {
                bail!("pass an image, or all of --nitrogen --phosphorus --potassium --ph --location");
            };
            page.analyze_parameters(SoilParameters {
                nitrogen,
                phosphorus,
                potassium,
                ph,
                location,
            })
            .await?
        }
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &RecommendationReport) {
    println!("Soil type: {}", report.soil_type);
    for crop in &report.suitable_crops {
        println!(
            "  {:<8} profitability {:<12} yield {}",
            crop.name, crop.profitability, crop.expected_yield
        );
    }
    println!("{}", report.recommendation);
    println!("(source: {:?})", report.source);
}

async fn read_file(path: &Path) -> anyhow::Result<LocalFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(LocalFile {
        name,
        content_type,
        bytes: Bytes::from(bytes),
    })
}
