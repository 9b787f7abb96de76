use std::{future::IntoFuture, pin::pin, process, sync::Arc};

use pageviews::{
    application::{
        error::AppError,
        identity::{FileStorage, IdentityProvider, NoIdentity, StoredIdentity},
        recorder::{DedupPolicy, RecordOutcome},
        store::KeyValueStore,
        views::ContentTypes,
    },
    cache::RevalidationConfig,
    config,
    domain::keys::validate_slug,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        store::build_store,
        telemetry,
    },
};
use pageviews_api_types::ViewCount;
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    let store = build_store(&settings.store)?;
    let content_types = Arc::new(build_content_types(store.clone(), &settings)?);

    let result = match command {
        config::Command::Serve(_) => run_serve(&settings, content_types, store.clone()).await,
        config::Command::Views(args) => match args.command {
            config::ViewsCommand::Get(get) => run_views_get(&content_types, get).await,
            config::ViewsCommand::Record(record) => {
                run_views_record(&settings, &content_types, record).await
            }
        },
        config::Command::Visitor(_) => run_visitor(&settings),
    };

    store.close().await;
    result
}

fn build_content_types(
    store: Arc<dyn KeyValueStore>,
    settings: &config::Settings,
) -> Result<ContentTypes, AppError> {
    Ok(ContentTypes::new(
        store,
        &settings.counters.namespace,
        &settings.counters.categories,
        RevalidationConfig::from(&settings.revalidate),
        DedupPolicy::from(&settings.dedup),
    )?)
}

async fn run_serve(
    settings: &config::Settings,
    content_types: Arc<ContentTypes>,
    store: Arc<dyn KeyValueStore>,
) -> Result<(), AppError> {
    let state = HttpState::new(content_types, store, settings);
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target: "pageviews::serve",
        addr = %settings.server.addr,
        categories = ?settings.counters.categories,
        "Listening"
    );

    let drain = Arc::new(Notify::new());
    let drain_signal = drain.clone();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { drain_signal.notified().await })
        .into_future();
    let mut server = pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = shutdown_signal() => {
            info!(target: "pageviews::serve", "Shutdown requested; draining connections");
            drain.notify_one();
            match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
                Ok(result) => {
                    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
                }
                Err(_) => warn!(
                    target: "pageviews::serve",
                    timeout = ?settings.server.graceful_shutdown,
                    "Graceful shutdown timed out; dropping open connections"
                ),
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run_views_get(
    content_types: &ContentTypes,
    args: config::ViewsGetArgs,
) -> Result<(), AppError> {
    let views = content_types.get_or_default(args.category.as_deref())?;
    for slug in &args.slugs {
        validate_slug(slug)?;
    }

    let counts = if args.fresh {
        views.fresh_counts(&args.slugs).await
    } else {
        views.get_counts(&args.slugs).await
    };

    if args.json {
        for (slug, count) in counts {
            let line = serde_json::to_string(&ViewCount { slug, views: count })
                .map_err(|err| AppError::unexpected(err.to_string()))?;
            println!("{line}");
        }
    } else {
        let width = counts.iter().map(|(slug, _)| slug.len()).max().unwrap_or(0);
        for (slug, count) in counts.iter() {
            println!("{slug:<width$}  {count}");
        }
    }

    Ok(())
}

async fn run_views_record(
    settings: &config::Settings,
    content_types: &ContentTypes,
    args: config::ViewsRecordArgs,
) -> Result<(), AppError> {
    let views = content_types.get_or_default(args.category.as_deref())?;
    let identity: Box<dyn IdentityProvider> = if args.anonymous {
        Box::new(NoIdentity)
    } else {
        Box::new(StoredIdentity::new(FileStorage::new(&settings.identity.file)))
    };

    let outcome = views
        .record_view(&args.slug, identity.as_ref())?
        .await
        .map_err(|err| AppError::unexpected(format!("record task failed: {err}")))?;

    match outcome {
        RecordOutcome::Counted(total) => {
            println!("{}  {total}", args.slug);
            Ok(())
        }
        RecordOutcome::Suppressed => {
            println!("{}  repeat view suppressed", args.slug);
            Ok(())
        }
        RecordOutcome::Rejected => Err(AppError::validation(format!(
            "slug `{}` cannot be recorded",
            args.slug
        ))),
        RecordOutcome::Failed => Err(AppError::unexpected(
            "view was not recorded; the store is unavailable",
        )),
    }
}

fn run_visitor(settings: &config::Settings) -> Result<(), AppError> {
    let identity = StoredIdentity::new(FileStorage::new(&settings.identity.file));
    let visitor = identity.resolve().ok_or_else(|| {
        AppError::unexpected(format!(
            "visitor storage `{}` is unreadable",
            settings.identity.file.display()
        ))
    })?;
    println!("{visitor}");
    Ok(())
}
