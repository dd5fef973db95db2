//! End-to-end behavior of the crawler manager over fake crawlers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{harness, FakeCrawler, JD_ID, JD_URL};
use pricecrawl::crawler::manager::{product_cache_key, PRODUCTS_TAG};
use pricecrawl::crawler::{CrawlerError, ManagerOptions};
use pricecrawl::models::{Platform, ProductRecord};
use pricecrawl::repository::ProductStore;

#[tokio::test]
async fn search_survives_a_failing_platform() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let taobao = Arc::new(FakeCrawler::new(Platform::Taobao, 189.0).failing());
    let h = harness(vec![jd.clone(), taobao.clone()], ManagerOptions::default());

    let results = h
        .manager
        .search_products("耳机", &[Platform::Jd, Platform::Taobao])
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].platform, Platform::Jd);
    assert_eq!(taobao.searches.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn complete_searches_are_cached() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let h = harness(vec![jd.clone()], ManagerOptions::default());

    let first = h.manager.search_products("kettle", &[]).await.unwrap();
    let second = h.manager.search_products("kettle", &[Platform::Jd]).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(jd.searches.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn update_without_price_history_is_not_found() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let h = harness(vec![jd.clone()], ManagerOptions::default());
    let record = ProductRecord {
        id: "bare".to_string(),
        platform: Platform::Jd,
        url: "https://item.jd.com/bare.html".to_string(),
        name: "No prices yet".to_string(),
        description: String::new(),
        image: String::new(),
        category: String::new(),
        brand: String::new(),
        model: String::new(),
        price: 1.0,
        original_price: 1.0,
        currency: "CNY".to_string(),
        in_stock: true,
        shop: None,
    };
    h.store.upsert_product(&record).await.unwrap();

    let err = h.manager.update_product_price("bare").await.unwrap_err();

    assert!(matches!(err, CrawlerError::ProductNotFound(_)));
    assert!(h.store.price_history("bare", 10).await.unwrap().is_empty());
    assert_eq!(jd.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_share_one_crawl() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0).slow(Duration::from_secs(2)));
    let h = harness(vec![jd.clone()], ManagerOptions::default());

    let (a, b) = tokio::join!(
        h.manager.get_product_info(JD_URL),
        h.manager.get_product_info(JD_URL)
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(jd.fetch_count(), 1);
    assert_eq!(h.store.price_history(JD_ID, 10).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_without_lock_crawl_at_most_twice() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0).slow(Duration::from_secs(2)));
    let options = ManagerOptions {
        dedup_lock: false,
        ..ManagerOptions::default()
    };
    let h = harness(vec![jd.clone()], options);

    let (a, b) = tokio::join!(
        h.manager.get_product_info(JD_URL),
        h.manager.get_product_info(JD_URL)
    );

    assert!(a.is_ok() && b.is_ok());
    assert!((1..=2).contains(&jd.fetch_count()));
}

#[tokio::test]
async fn fetch_within_ttl_crawls_once() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let h = harness(vec![jd.clone()], ManagerOptions::default());

    let first = h.manager.get_product_info(JD_URL).await.unwrap();
    let second = h.manager.get_product_info(JD_URL).await.unwrap();

    assert_eq!(first, second);
    assert!(!first.id.is_empty());
    assert!(first.price > 0.0);
    assert_eq!(jd.fetch_count(), 1);
}

#[tokio::test]
async fn cached_product_is_dropped_by_products_tag() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let h = harness(vec![jd.clone()], ManagerOptions::default());
    h.manager.get_product_info(JD_URL).await.unwrap();
    let key = product_cache_key(Platform::Jd, JD_URL);
    assert!(h.cache.get::<ProductRecord>(&key).await.is_some());

    h.cache.delete_by_tag(PRODUCTS_TAG).await;

    assert!(h.cache.get::<ProductRecord>(&key).await.is_none());
    h.manager.get_product_info(JD_URL).await.unwrap();
    assert_eq!(jd.fetch_count(), 2);
}

#[tokio::test]
async fn zero_price_is_rejected_and_not_stored() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 0.0));
    let h = harness(vec![jd.clone()], ManagerOptions::default());

    let err = h.manager.get_product_info(JD_URL).await.unwrap_err();

    assert!(matches!(err, CrawlerError::Extraction(_)));
    assert!(h.store.load_product(JD_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn update_appends_exactly_one_latest_price() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let h = harness(vec![jd.clone()], ManagerOptions::default());
    h.manager.get_product_info(JD_URL).await.unwrap();
    let before = h.store.price_history(JD_ID, 100).await.unwrap().len();

    let price = h.manager.update_product_price(JD_ID).await.unwrap();

    let history = h.store.price_history(JD_ID, 100).await.unwrap();
    assert_eq!(history.len(), before + 1);
    assert_eq!(history[0], price);
    assert!(history[0].created_at >= history[1].created_at);
    // The product's cached entries were invalidated.
    assert!(h
        .cache
        .get::<ProductRecord>(&product_cache_key(Platform::Jd, JD_URL))
        .await
        .is_none());
}

#[tokio::test]
async fn batch_counts_failures_without_failing() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let h = harness(vec![jd.clone()], ManagerOptions::default());
    h.manager.get_product_info(JD_URL).await.unwrap();
    h.manager
        .get_product_info("https://item.jd.com/200.html")
        .await
        .unwrap();

    let ids: Vec<String> = [JD_ID, "JD:200", "missing-1", "missing-2"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let summary = h.manager.batch_update_prices(&ids).await;

    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failure_count, 2);
    let failed: Vec<&str> = summary.errors.iter().map(|e| e.product_id.as_str()).collect();
    assert_eq!(failed, vec!["missing-1", "missing-2"]);
}

#[tokio::test]
async fn same_source_id_on_two_platforms_stays_two_products() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let taobao = Arc::new(FakeCrawler::new(Platform::Taobao, 99.0));
    let h = harness(vec![jd.clone(), taobao.clone()], ManagerOptions::default());

    let on_jd = h
        .manager
        .get_product_info("https://item.jd.com/586012345678.html")
        .await
        .unwrap();
    let on_taobao = h
        .manager
        .get_product_info("https://item.taobao.com/item.htm?id=586012345678")
        .await
        .unwrap();

    assert_eq!(on_jd.id, "JD:586012345678");
    assert_eq!(on_taobao.id, "Taobao:586012345678");
    let listings = [
        (&on_jd, Platform::Jd, 199.0),
        (&on_taobao, Platform::Taobao, 99.0),
    ];
    for (record, platform, price) in listings {
        let history = h.store.price_history(&record.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].platform, platform);
        assert_eq!(history[0].price, price);
    }

    h.manager.update_product_price(&on_jd.id).await.unwrap();

    assert_eq!(jd.fetch_count(), 2);
    assert_eq!(taobao.fetch_count(), 1);
    assert_eq!(h.store.price_history(&on_jd.id, 10).await.unwrap().len(), 2);
    assert_eq!(h.store.price_history(&on_taobao.id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn blocked_platform_error_reaches_the_caller() {
    let taobao = Arc::new(FakeCrawler::new(Platform::Taobao, 10.0).failing());
    let h = harness(vec![taobao], ManagerOptions::default());

    let err = h
        .manager
        .get_product_info("https://item.taobao.com/item.htm?id=5")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CrawlerError::AccessBlocked {
            platform: Platform::Taobao,
            ..
        }
    ));
}

#[tokio::test]
async fn reregistering_a_task_keeps_one_job() {
    let jd = Arc::new(FakeCrawler::new(Platform::Jd, 199.0));
    let h = harness(vec![jd], ManagerOptions::default());
    h.manager.get_product_info(JD_URL).await.unwrap();

    h.manager.register_update_task(JD_ID, 60).await.unwrap();
    h.manager.register_update_task(JD_ID, 15).await.unwrap();

    let jobs = h.scheduler.status().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].schedule, "every 15m");
}
