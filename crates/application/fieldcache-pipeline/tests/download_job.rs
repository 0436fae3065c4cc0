mod support;

use std::sync::atomic::Ordering;

use fieldcache_core::{DownloadPhase, ErrorCategory, RemoteError};
use futures::StreamExt;
use support::{eventually, extent, service, Extraction, FakeCapability, Fixture};

#[tokio::test]
async fn successful_download_reports_monotonic_progress_and_dataset() {
    let fixture = Fixture::new(vec![]);
    let config = service("parcels");
    let capability = fixture.connector.register(
        &config,
        FakeCapability::new("parcels", Extraction::Succeed(vec![(0, 3), (2, 1)])),
    );

    let updates: Vec<_> = fixture
        .engine()
        .download_job()
        .download(config, extent())
        .collect()
        .await;

    let mut previous = 0.0;
    for update in &updates {
        assert!(update.fraction >= previous, "progress went backwards: {updates:?}");
        previous = update.fraction;
        if update.phase == DownloadPhase::Generating {
            assert!((0.3..=0.9).contains(&update.fraction));
        }
    }
    let phases: Vec<_> = updates.iter().map(|u| u.phase).collect();
    assert_eq!(phases.first(), Some(&DownloadPhase::CheckingConnectivity));
    assert!(phases.contains(&DownloadPhase::Processing));

    let last = updates.last().unwrap();
    assert!(last.succeeded());
    assert_eq!(last.fraction, 1.0);
    let dataset = last.payload.as_ref().unwrap();
    assert_eq!(dataset.service_id, "parcels");
    assert_eq!(dataset.layer_count, 2);
    assert_eq!(dataset.path, fixture.cache_path("parcels"));
    assert_eq!(updates.iter().filter(|u| u.is_complete).count(), 1);

    let params = capability.last_params.lock().unwrap().clone().unwrap();
    assert!(!params.include_attachments);
    assert_eq!(params.out_wkid, 4326);

    let opens = fixture.store.opens.load(Ordering::SeqCst);
    assert_eq!(opens, 1);
    assert_eq!(fixture.store.closes.load(Ordering::SeqCst), opens);
}

#[tokio::test]
async fn download_replaces_existing_cache() {
    let fixture = Fixture::new(vec![]);
    let config = service("parcels");
    fixture.seed_cache("parcels", &[(0, 1), (1, 1), (2, 1)]);
    fixture.connector.register(
        &config,
        FakeCapability::new("parcels", Extraction::Succeed(vec![(5, 2)])),
    );

    let last = fixture
        .engine()
        .download_job()
        .download(config, extent())
        .last()
        .await
        .unwrap();
    assert_eq!(last.payload.unwrap().layer_count, 1);
}

#[tokio::test]
async fn transient_load_failure_is_retried() {
    let fixture = Fixture::new(vec![]);
    let config = service("parcels");
    fixture.connector.register(
        &config,
        FakeCapability::new("parcels", Extraction::Succeed(vec![(0, 1)])),
    );
    fixture.connector.fail_next(RemoteError::Http {
        status: 503,
        message: "busy".into(),
    });

    let last = fixture
        .engine()
        .download_job()
        .download(config, extent())
        .last()
        .await
        .unwrap();
    assert!(last.succeeded());
    assert_eq!(fixture.connector.load_calls(), 2);
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let fixture = Fixture::new(vec![]);
    let config = service("parcels");
    fixture.connector.fail_next(RemoteError::Http {
        status: 401,
        message: "unauthorized".into(),
    });

    let last = fixture
        .engine()
        .download_job()
        .download(config, extent())
        .last()
        .await
        .unwrap();
    assert!(last.is_complete);
    assert_eq!(last.error, Some(ErrorCategory::AuthenticationFailed));
    assert_eq!(last.phase, DownloadPhase::Failed);
    assert_eq!(fixture.connector.load_calls(), 1);
}

#[tokio::test]
async fn offline_device_fails_without_remote_calls() {
    let fixture = Fixture::new(vec![]);
    fixture.connectivity.set_online(false);

    let last = fixture
        .engine()
        .download_job()
        .download(service("parcels"), extent())
        .last()
        .await
        .unwrap();
    assert_eq!(last.error, Some(ErrorCategory::NoInternet));
    assert_eq!(last.message, ErrorCategory::NoInternet.user_message());
    assert_eq!(fixture.connector.load_calls(), 0);
}

#[tokio::test]
async fn extraction_failure_keeps_last_fraction() {
    let fixture = Fixture::new(vec![]);
    let config = service("parcels");
    fixture.connector.register(
        &config,
        FakeCapability::new(
            "parcels",
            Extraction::FailAt(50, || RemoteError::Http {
                status: 504,
                message: "gateway timeout".into(),
            }),
        ),
    );

    let last = fixture
        .engine()
        .download_job()
        .download(config, extent())
        .last()
        .await
        .unwrap();
    assert_eq!(last.error, Some(ErrorCategory::ServerTimeout));
    assert!((last.fraction - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn empty_extraction_is_a_failure() {
    // The id reads like a network failure; the category must not follow it.
    let fixture = Fixture::new(vec![]);
    let config = service("offline-maps");
    fixture.connector.register(
        &config,
        FakeCapability::new("offline-maps", Extraction::Succeed(vec![])),
    );

    let last = fixture
        .engine()
        .download_job()
        .download(config, extent())
        .last()
        .await
        .unwrap();
    assert!(last.is_failed());
    assert!(last.payload.is_none());
    assert_eq!(last.error, Some(ErrorCategory::Unknown));
}

#[tokio::test]
async fn missing_url_fails_as_configuration_error() {
    let fixture = Fixture::new(vec![]);
    let mut config = service("parcels");
    config.url.clear();

    let last = fixture
        .engine()
        .download_job()
        .download(config, extent())
        .last()
        .await
        .unwrap();
    assert_eq!(last.error, Some(ErrorCategory::Unknown));
    assert_eq!(fixture.connector.load_calls(), 0);
}

#[tokio::test]
async fn dropping_the_stream_cancels_the_extraction() {
    let fixture = Fixture::new(vec![]);
    let config = service("parcels");
    let capability = fixture
        .connector
        .register(&config, FakeCapability::new("parcels", Extraction::Hang));

    let mut stream = fixture.engine().download_job().download(config, extent());
    while let Some(update) = stream.next().await {
        if update.phase == DownloadPhase::Generating && update.fraction > 0.3 {
            break;
        }
    }
    assert!(capability.started.load(Ordering::SeqCst));
    assert!(!capability.cancelled.load(Ordering::SeqCst));

    drop(stream);
    assert!(eventually(&capability.cancelled).await);
}
