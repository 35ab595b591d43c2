use std::sync::Arc;
use std::time::Duration;

use dbmeta_cache::{CacheError, ConnectionError, Freshness};
use dbmeta_postgres::DataSourceError;

use crate::{Monitor, names, setup_datasource};

#[tokio::test]
async fn test_lookup_without_full_load() {
    let (datasource, catalog) = setup_datasource(|_| {});
    let monitor = Monitor::new();

    let work_mem = datasource
        .get_setting(&monitor, "WORK_MEM")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(work_mem.name(), "work_mem");
    assert_eq!(work_mem.value().unit.as_deref(), Some("kB"));
    assert_eq!(catalog.queries(), 1);

    // a targeted lookup does not make the collection complete
    assert_eq!(datasource.setting_cache().freshness(), Freshness::Empty);
    assert!(datasource.setting_cache().get_cached_objects().is_empty());
    assert!(datasource.setting("Work_Mem").is_some());

    assert!(datasource.get_setting(&monitor, "shared_buffers").await.unwrap().is_none());
    assert_eq!(catalog.queries(), 2);

    let settings = datasource.settings(&monitor).await.unwrap();
    assert_eq!(
        names(&settings, |s| s.name().to_owned()),
        ["TimeZone", "max_connections", "work_mem"]
    );
    assert!(Arc::ptr_eq(&settings[2], &work_mem));
    assert_eq!(catalog.queries(), 3);

    // everything is known now
    assert!(datasource.get_setting(&monitor, "shared_buffers").await.unwrap().is_none());
    assert!(datasource.get_setting(&monitor, "timezone").await.unwrap().is_some());
    assert_eq!(catalog.queries(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_share_one_query() {
    let (datasource, catalog) = setup_datasource(|_| {});
    catalog.update(|document| document.latency = Some(Duration::from_millis(50)));
    let datasource = Arc::new(datasource);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let datasource = Arc::clone(&datasource);
            tokio::spawn(async move {
                let monitor = Monitor::new();
                if i % 2 == 0 {
                    datasource.settings(&monitor).await.map(|s| s.len())
                } else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    // waits for the listing instead of querying on its own
                    datasource
                        .get_setting(&monitor, "max_connections")
                        .await
                        .map(|s| s.map_or(0, |_| 1))
                }
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let found = task.await.unwrap().unwrap();
        assert_eq!(found, if i % 2 == 0 { 3 } else { 1 });
    }
    assert_eq!(catalog.queries(), 1);
}

#[tokio::test]
async fn test_failed_listing() {
    let (datasource, catalog) = setup_datasource(|_| {});
    let monitor = Monitor::new();

    catalog.set_offline(Some("server closed the connection unexpectedly"));
    let err = datasource.settings(&monitor).await.unwrap_err();
    match err {
        DataSourceError::Cache(CacheError::RemoteFetch { cache, source }) => {
            assert_eq!(&*cache, "settings");
            assert!(matches!(source, ConnectionError::ConnectionLost(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(datasource.setting_cache().freshness(), Freshness::Empty);

    catalog.set_offline(None);
    assert_eq!(datasource.settings(&monitor).await.unwrap().len(), 3);
}
