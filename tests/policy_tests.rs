//! Connector behaviour against the in-memory provider

use cloudsql_connect::{
    ConnectTarget, Connector, DatabaseTarget, Error, FakeProvider, InstanceRef, IpType,
    NetworkMode, PrincipalIdentity, ProviderState,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn target(mode: NetworkMode) -> ConnectTarget {
    ConnectTarget::new(
        "proj:region:inst".parse::<InstanceRef>().unwrap(),
        PrincipalIdentity::parse("svc@proj.iam").unwrap(),
        DatabaseTarget::new("appdb").unwrap(),
        mode,
    )
}

#[tokio::test]
async fn test_public_select_one() {
    let fake = Arc::new(FakeProvider::builder().build());
    let connector = Connector::new(fake.clone());

    let mut session = connector
        .acquire(&target(NetworkMode::PublicProxied))
        .await
        .expect("acquire");
    let value: i64 = session.query_scalar("SELECT 1").await.expect("query");
    assert_eq!(value, 1);
    assert_eq!(session.mode(), NetworkMode::PublicProxied);

    assert_ok!(connector.release(session).await);
    assert_ok!(connector.shutdown().await);
    assert!(fake.is_closed());
}

#[tokio::test]
async fn test_public_request_carries_no_private_flag() {
    let fake = Arc::new(FakeProvider::builder().build());
    let connector = Connector::new(fake.clone());

    let session = connector
        .acquire(&target(NetworkMode::PublicProxied))
        .await
        .unwrap();
    connector.release(session).await.unwrap();

    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].ip_type, None);
    assert!(requests[0].enable_iam_auth);
    assert_eq!(requests[0].user, "svc@proj.iam");
    assert_eq!(requests[0].database, "appdb");
}

#[tokio::test]
async fn test_private_without_route_is_transport_error() {
    let fake = Arc::new(FakeProvider::builder().private_route(false).build());
    let connector = Connector::new(fake.clone());

    let result = connector.acquire(&target(NetworkMode::PrivatePeered)).await;
    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(fake.requests()[0].ip_type, Some(IpType::Private));

    // Failed acquisitions leave nothing outstanding
    assert_eq!(connector.outstanding(), 0);
    connector.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_private_with_route_succeeds() {
    let fake = Arc::new(FakeProvider::builder().private_route(true).build());
    let connector = Connector::new(fake.clone());

    let session = connector
        .acquire(&target(NetworkMode::PrivatePeered))
        .await
        .expect("acquire");
    assert_eq!(session.mode(), NetworkMode::PrivatePeered);
    connector.release(session).await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_principal_is_auth_error() {
    let fake = Arc::new(FakeProvider::builder().authorize("admin@proj.iam").build());
    let connector = Connector::new(fake);

    let result = connector.acquire(&target(NetworkMode::PublicProxied)).await;
    assert!(matches!(result, Err(Error::Auth(_))));
}

#[tokio::test]
async fn test_shutdown_before_release_is_usage_error() {
    let fake = Arc::new(FakeProvider::builder().build());
    let connector = Connector::new(fake.clone());

    let session = connector
        .acquire(&target(NetworkMode::PublicProxied))
        .await
        .unwrap();
    assert_eq!(connector.outstanding(), 1);
    let err = assert_err!(connector.shutdown().await);
    assert!(matches!(err, Error::Usage(_)));
    assert!(!fake.is_closed());

    assert_ok!(connector.release(session).await);
    assert_ok!(connector.shutdown().await);
    assert!(fake.is_closed());
}

#[tokio::test]
async fn test_operations_after_shutdown_are_usage_errors() {
    let connector = Connector::new(Arc::new(FakeProvider::builder().build()));
    connector.start().await.unwrap();
    assert_eq!(connector.state().await, ProviderState::Active);

    connector.shutdown().await.unwrap();
    assert_eq!(connector.state().await, ProviderState::ShutDown);

    assert!(matches!(connector.shutdown().await, Err(Error::Usage(_))));
    assert!(matches!(
        connector.acquire(&target(NetworkMode::PublicProxied)).await,
        Err(Error::Usage(_))
    ));
    assert!(matches!(connector.start().await, Err(Error::Usage(_))));
}

#[tokio::test]
async fn test_shutdown_without_use_skips_provider_close() {
    let fake = Arc::new(FakeProvider::builder().build());
    let connector = Connector::new(fake.clone());

    connector.shutdown().await.unwrap();
    assert_eq!(connector.state().await, ProviderState::ShutDown);
    assert!(!fake.is_closed());
}

#[tokio::test]
async fn test_with_session_releases_on_error() {
    let fake = Arc::new(FakeProvider::builder().build());
    let connector = Connector::new(fake.clone());

    let result: Result<(), Error> = connector
        .with_session(&target(NetworkMode::PublicProxied), |session| {
            Box::pin(async move {
                session.simple_query("SELECT broken(").await?;
                Ok::<(), Error>(())
            })
        })
        .await;
    assert!(matches!(result, Err(Error::Sql(_))));
    assert_eq!(connector.outstanding(), 0);
    assert_eq!(fake.open_sessions(), 0);

    connector.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_with_session_returns_body_value() {
    let connector = Connector::new(Arc::new(FakeProvider::builder().build()));

    let value = connector
        .with_session(&target(NetworkMode::PublicProxied), |session| {
            Box::pin(async move { session.query_scalar::<i64>("SELECT 7").await })
        })
        .await
        .unwrap();
    assert_eq!(value, 7);
    connector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_acquisitions_share_connector() {
    let connector = Connector::new(Arc::new(FakeProvider::builder().build()));
    let target = target(NetworkMode::PublicProxied);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let connector = connector.clone();
        let target = target.clone();
        handles.push(tokio::spawn(async move {
            let mut session = connector.acquire(&target).await?;
            let value: i64 = session.query_scalar("SELECT 1").await?;
            connector.release(session).await?;
            Ok::<_, Error>(value)
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    assert_eq!(connector.outstanding(), 0);
    connector.shutdown().await.unwrap();
}
