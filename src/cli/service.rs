//! Service lifecycle commands.

use crate::cli::{Command, Context, CreateArgs, UpgradeArgs};
use crate::error::ServiceError;
use crate::lifecycle::{DestroyOptions, LifecycleManager, UpgradeRequest};
use crate::prompt::Prompter;
use crate::service::{DEFAULT_IMAGE_NAME, DEFAULT_IMAGE_VERSION, Service};

/// Run a lifecycle command.
pub async fn run_service_command(ctx: &mut Context, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Create(args) => cmd_create(ctx, args).await,
        Command::Destroy { name, yes, force } => {
            let name = resolve_name(ctx, name.as_deref())?;
            let lifecycle = lifecycle(ctx).await?;
            lifecycle
                .destroy(
                    &mut ctx.store,
                    &name,
                    DestroyOptions { yes, force },
                    ctx.prompter.as_ref(),
                )
                .await?;
            ctx.resync_admin().await?;
            println!("Destroyed service '{}'", name);
            Ok(())
        }
        Command::Start { name } => cmd_start(ctx, name, false).await,
        Command::Restart { name } => cmd_start(ctx, name, true).await,
        Command::Stop { name } => {
            let name = resolve_name(ctx, name.as_deref())?;
            let lifecycle = lifecycle(ctx).await?;
            lifecycle.stop(&ctx.store, &name).await?;
            ctx.resync_admin().await?;
            println!("Stopped service '{}'", name);
            Ok(())
        }
        Command::Use { name } => {
            ctx.store.set_default(&name)?;
            ctx.store.save()?;
            println!("Default service is now '{}'", name);
            Ok(())
        }
        Command::List => cmd_list(ctx).await,
        Command::Upgrade(args) => cmd_upgrade(ctx, args).await,
        other => anyhow::bail!("not a service command: {:?}", other),
    }
}

async fn lifecycle(ctx: &mut Context) -> anyhow::Result<LifecycleManager> {
    let runtime = ctx.runtime().await?;
    Ok(LifecycleManager::new(runtime, &ctx.config))
}

fn resolve_name(ctx: &Context, name: Option<&str>) -> anyhow::Result<String> {
    Ok(ctx.store.get_service_or_default(name)?.name().to_string())
}

/// Ask for a new service's password twice when none was given.
///
/// Returns `None` for an empty answer or a non-interactive session.
pub fn resolve_create_password(
    name: &str,
    given: Option<String>,
    prompter: &dyn Prompter,
) -> Result<Option<String>, ServiceError> {
    if given.is_some() || !prompter.is_interactive() {
        return Ok(given);
    }
    let password = prompter.password(&format!(
        "Password for '{}' (leave empty for none)",
        name
    ))?;
    if password.is_empty() {
        return Ok(None);
    }
    let confirm = prompter.password("Confirm password")?;
    if password != confirm {
        return Err(ServiceError::PasswordMismatch {
            name: name.to_string(),
        });
    }
    Ok(Some(password))
}

/// Build the service described by `args`. Installation-wide image
/// overrides apply only when the flags leave the image unset.
fn build_service(
    ctx: &Context,
    args: CreateArgs,
    password: Option<String>,
) -> Result<Service, ServiceError> {
    let mut service = match args.host {
        Some(host) => Service::external(args.name, host)?,
        None => Service::internal(args.name, args.storage)?,
    };
    if let Some(username) = args.username {
        service = service.with_username(username);
    }
    if let Some(password) = password {
        service = service.with_password(password);
    }
    if let Some(root) = args.root_password {
        service = service.with_root_password(root);
    }
    if let Some(hash) = args.password_hash {
        service = service.with_password_hash(hash);
    }
    if let Some(volume) = args.volume {
        service = service.with_volume(volume);
    }

    let config = &ctx.config;
    let image_name = args
        .image
        .or_else(|| (config.default_image != DEFAULT_IMAGE_NAME).then(|| config.default_image.clone()));
    let image_version = args.image_version.or_else(|| {
        (config.default_image_version != DEFAULT_IMAGE_VERSION)
            .then(|| config.default_image_version.clone())
    });
    service = service.with_image(image_name, image_version);

    for (key, value) in args.env {
        service = service.with_env(key, value);
    }
    Ok(service)
}

async fn cmd_create(ctx: &mut Context, mut args: CreateArgs) -> anyhow::Result<()> {
    let name = args.name.clone();
    if ctx.store.has_service(&name) {
        return Err(ServiceError::AlreadyExists { name }.into());
    }
    let password = resolve_create_password(&name, args.password.take(), ctx.prompter.as_ref())?;
    let service = build_service(ctx, args, password)?;
    let external = service.is_external();

    let lifecycle = lifecycle(ctx).await?;
    lifecycle.create(&mut ctx.store, service).await?;
    ctx.resync_admin().await?;

    if external {
        println!("Registered external service '{}'", name);
    } else {
        println!("Created service '{}'", name);
    }
    if ctx.store.is_default(&name) {
        println!("'{}' is the default service", name);
    }
    Ok(())
}

async fn cmd_start(ctx: &mut Context, name: Option<String>, restart: bool) -> anyhow::Result<()> {
    let service = ctx.store.get_service_or_default(name.as_deref())?.clone();
    let lifecycle = lifecycle(ctx).await?;
    lifecycle.ensure_started(&service, restart).await?;
    ctx.resync_admin().await?;
    let verb = if restart { "Restarted" } else { "Started" };
    println!("{} service '{}' ({})", verb, service.name(), service.container_name());
    Ok(())
}

async fn cmd_list(ctx: &mut Context) -> anyhow::Result<()> {
    if ctx.store.services().is_empty() {
        println!("No services configured. Create one with: mariadb-services create <name>");
        return Ok(());
    }

    let lifecycle = match lifecycle(ctx).await {
        Ok(lifecycle) => Some(lifecycle),
        Err(e) => {
            tracing::warn!("Container status unavailable: {:#}", e);
            None
        }
    };

    println!(
        "  {:<16} {:<10} {:<11} {:<24} {:<24} STATUS",
        "NAME", "KIND", "STORAGE", "VOLUME/HOST", "IMAGE"
    );
    println!("{}", "-".repeat(100));

    for service in ctx.store.services() {
        let marker = if ctx.store.is_default(service.name()) {
            "*"
        } else {
            " "
        };
        let (kind, storage, location, image) = match service.host() {
            Some(host) => ("external", "-".to_string(), host.to_string(), "-".to_string()),
            None => (
                "internal",
                service
                    .storage()
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
                match service.storage() {
                    Some(crate::service::StorageMode::Volume) => service.volume_name(),
                    _ => "-".to_string(),
                },
                service.image_tag(),
            ),
        };
        let status = match (&lifecycle, service.is_external()) {
            (_, true) => "-".to_string(),
            (None, false) => "unknown".to_string(),
            (Some(lifecycle), false) => match lifecycle.status(service).await {
                Ok(Some(status)) => status.status,
                Ok(None) => "stopped".to_string(),
                Err(e) => {
                    tracing::debug!("Status of '{}' unavailable: {}", service.name(), e);
                    "unknown".to_string()
                }
            },
        };
        println!(
            "{} {:<16} {:<10} {:<11} {:<24} {:<24} {}",
            marker,
            service.name(),
            kind,
            storage,
            location,
            image,
            status
        );
    }
    Ok(())
}

async fn cmd_upgrade(ctx: &mut Context, args: UpgradeArgs) -> anyhow::Result<()> {
    let name = resolve_name(ctx, args.name.as_deref())?;
    let request = UpgradeRequest {
        storage: args.storage,
        volume: args.volume,
        image_name: args.image,
        image_version: args.image_version,
    };
    if request.is_empty() {
        anyhow::bail!("Nothing to change; pass --storage, --volume, --image or --image-version");
    }

    let lifecycle = lifecycle(ctx).await?;
    let service = lifecycle.upgrade(&mut ctx.store, &name, request)?;
    println!(
        "Updated service '{}' ({}). Run 'mariadb-services restart {}' to apply.",
        name,
        service.image_tag(),
        name
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPrompter;

    #[test]
    fn test_password_given_skips_prompt() {
        let prompter = ScriptedPrompter::new();
        let password = resolve_create_password("app", Some("pw".into()), &prompter).unwrap();
        assert_eq!(password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_password_prompted_twice() {
        let prompter = ScriptedPrompter::new().with_password("s3cret").with_password("s3cret");
        let password = resolve_create_password("app", None, &prompter).unwrap();
        assert_eq!(password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_password_mismatch() {
        let prompter = ScriptedPrompter::new().with_password("one").with_password("two");
        let err = resolve_create_password("app", None, &prompter).unwrap_err();
        assert!(matches!(err, ServiceError::PasswordMismatch { .. }));
    }

    #[test]
    fn test_non_interactive_leaves_password_unset() {
        let prompter = ScriptedPrompter::non_interactive();
        assert_eq!(resolve_create_password("app", None, &prompter).unwrap(), None);
    }
}
