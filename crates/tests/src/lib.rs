//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 发布端 (DedupPublisher) -> bus -> Dispatcher -> 模拟客户端 的 e2e 测试
//! - 基于配置文件的装配测试

#[cfg(test)]
mod contract_tests {
    use contracts::{EngineConfig, EventKey};

    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_event_key_lookup_by_str() {
        let mut set = std::collections::HashSet::new();
        set.insert(EventKey::from("order_updated"));
        assert!(set.contains("order_updated"));
        assert!(!set.contains("price_tick"));
    }

    #[test]
    fn test_example_config_round_trip() {
        let raw = include_str!("../../../eventgate.example.toml");
        let config: EngineConfig =
            config_loader::ConfigLoader::load_from_str(raw, config_loader::ConfigFormat::Toml)
                .unwrap();
        let toml = config_loader::ConfigLoader::to_toml(&config).unwrap();
        let reparsed =
            config_loader::ConfigLoader::load_from_str(&toml, config_loader::ConfigFormat::Toml)
                .unwrap();
        assert_eq!(reparsed.consumers.len(), config.consumers.len());
        assert_eq!(reparsed.dedup.window_ms, config.dedup.window_ms);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use contracts::{handler, BoxError, Handler};
    use dedup::DedupCache;
    use dispatcher::{Consumer, ConsumerConfig, Dispatcher, DispatcherBuilder, DispatcherConfig};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use transport::{
        encode_event, json_extractor, json_status_decoder, ChannelPublisher, ChannelSession,
        DedupPublisher, MockEventSource, MockSourceConfig, PublishOutcome,
        SessionPeer,
    };

    fn echo() -> Handler {
        handler(|payload: &Bytes| Ok::<_, BoxError>(payload.clone()))
    }

    fn dispatcher(workers: usize) -> Dispatcher {
        DispatcherBuilder::new(DispatcherConfig {
            workers,
            ..Default::default()
        })
        .extractor(json_extractor())
        .build()
        .unwrap()
    }

    /// Register a consumer with one status activating `active`, echo handlers for `handled`
    fn register(
        d: &mut Dispatcher,
        id: &str,
        active: &[&str],
        handled: &[&str],
    ) -> (Arc<Consumer>, SessionPeer) {
        let (session, peer) = ChannelSession::pair(id, 64);
        let mut config = ConsumerConfig::new(id, json_status_decoder())
            .status("idle", Vec::<&str>::new())
            .status("on", active.iter().copied());
        for key in handled {
            config = config.handler(*key, echo());
        }
        let consumer = d.register_config(config, session).unwrap();
        (consumer, peer)
    }

    /// Poll `cond` until true, failing after 5s
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn drain(peer: &mut SessionPeer) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Some(raw) = peer.try_recv() {
            out.push(serde_json::from_slice(&raw).unwrap());
        }
        out
    }

    /// End-to-end: DedupPublisher -> ChannelPublisher bus -> Dispatcher -> consumers
    ///
    /// 验证：
    /// 1. 窗口内重复 key 只发布一次
    /// 2. 每个 consumer 只收到当前状态激活的事件
    /// 3. 输入结束后 worker 排空队列，close 无错误
    #[tokio::test]
    async fn test_e2e_dedup_publish_fan_out() {
        let cache = Arc::new(DedupCache::new(Duration::from_secs(60)).unwrap());
        let (bus, source) = ChannelPublisher::bus("bus", 64);
        let publisher = DedupPublisher::new(bus, Arc::clone(&cache));

        let mut d = dispatcher(2);
        let (c1, mut p1) = register(&mut d, "c1", &["a", "b"], &["a", "b"]);
        let (c2, mut p2) = register(&mut d, "c2", &["a"], &["a"]);
        let (c3, mut p3) = register(&mut d, "c3", &["a", "b"], &["a", "b"]);

        p1.send_key("on").await.unwrap();
        p2.send_key("on").await.unwrap();
        p3.send_key("idle").await.unwrap();
        wait_until(|| c1.is_active("a") && c2.is_active("a") && c3.current_status().is_some()).await;

        d.connect(source).await.unwrap();
        d.run().unwrap();

        let mut outcomes = Vec::new();
        for (key, n) in [("a", 1), ("a", 2), ("b", 3), ("a", 4), ("b", 5)] {
            let data = encode_event(key, &json!({ "n": n })).unwrap();
            outcomes.push(publisher.publish(key, data).await.unwrap());
        }
        assert_eq!(
            outcomes,
            vec![
                PublishOutcome::Sent,
                PublishOutcome::Suppressed,
                PublishOutcome::Sent,
                PublishOutcome::Suppressed,
                PublishOutcome::Suppressed,
            ]
        );

        // Closing the bus ends the input; workers drain before the fan-out stops
        drop(publisher);
        wait_until(|| !d.is_running()).await;
        assert!(d.close().await.is_empty());

        let metrics = d.metrics();
        assert_eq!(metrics.received, 2);
        assert_eq!(metrics.fanned_out, 2);

        assert_eq!(drain(&mut p1), vec![json!({ "n": 1 }), json!({ "n": 3 })]);
        assert_eq!(drain(&mut p2), vec![json!({ "n": 1 })]);
        assert!(drain(&mut p3).is_empty());

        let c2_stats = c2.metrics().snapshot();
        assert_eq!(c2_stats.delivered, 1);
        assert_eq!(c2_stats.gated, 1);
        assert_eq!(c3.metrics().snapshot().gated, 2);

        let dedup = cache.metrics().snapshot();
        assert_eq!(dedup.admitted_count, 2);
        assert_eq!(dedup.suppressed_count, 3);
    }

    /// Status switches mid-stream change what the consumer receives
    #[tokio::test]
    async fn test_e2e_status_switch_mid_stream() {
        let (tx, source) = transport::ChannelSource::pair("bus", 16);
        let mut d = dispatcher(1);
        let (consumer, mut peer) = register(&mut d, "desk", &["tick"], &["tick"]);
        d.connect(source).await.unwrap();
        d.run().unwrap();

        // Status unset: gated
        tx.send(encode_event("tick", &1).unwrap()).await.unwrap();
        wait_until(|| consumer.metrics().gated() == 1).await;

        peer.send_key("on").await.unwrap();
        wait_until(|| consumer.is_active("tick")).await;
        tx.send(encode_event("tick", &2).unwrap()).await.unwrap();
        wait_until(|| consumer.metrics().delivered() == 1).await;

        peer.send_key("idle").await.unwrap();
        wait_until(|| !consumer.is_active("tick")).await;
        tx.send(encode_event("tick", &3).unwrap()).await.unwrap();
        wait_until(|| consumer.metrics().gated() == 2).await;

        // Unknown keys leave the status alone
        peer.send_key("not_a_status").await.unwrap();
        peer.send(Bytes::from_static(b"garbage")).await.unwrap();
        tx.send(encode_event("tick", &4).unwrap()).await.unwrap();
        wait_until(|| consumer.metrics().gated() == 3).await;
        assert_eq!(consumer.current_status().map(|s| s.as_str()), Some("idle"));

        drop(tx);
        wait_until(|| !d.is_running()).await;
        assert!(d.close().await.is_empty());

        assert_eq!(drain(&mut peer), vec![json!(2)]);
        assert_eq!(consumer.metrics().status_changes(), 2);
    }

    /// A disconnected peer never blocks the other consumers
    #[tokio::test]
    async fn test_e2e_disconnected_consumer_isolated() {
        let (tx, source) = transport::ChannelSource::pair("bus", 16);
        let mut d = dispatcher(1);
        let (gone, gone_peer) = register(&mut d, "gone", &["evt"], &["evt"]);
        let (healthy, mut healthy_peer) = register(&mut d, "healthy", &["evt"], &["evt"]);

        gone_peer.send_key("on").await.unwrap();
        healthy_peer.send_key("on").await.unwrap();
        wait_until(|| gone.is_active("evt") && healthy.is_active("evt")).await;

        drop(gone_peer);
        wait_until(|| gone.is_closed()).await;

        d.connect(source).await.unwrap();
        d.run().unwrap();
        for i in 0..10 {
            tx.send(encode_event("evt", &i).unwrap()).await.unwrap();
        }
        drop(tx);
        wait_until(|| !d.is_running()).await;
        assert!(d.close().await.is_empty());

        assert_eq!(drain(&mut healthy_peer).len(), 10);
        assert_eq!(healthy.metrics().delivered(), 10);
        assert_eq!(gone.metrics().delivered(), 0);
        assert_eq!(gone.metrics().gated(), 10);
    }

    /// Undecodable bus messages are counted and skipped
    #[tokio::test]
    async fn test_e2e_decode_failures_skipped() {
        let (tx, source) = transport::ChannelSource::pair("bus", 16);
        let mut d = dispatcher(2);
        let (consumer, mut peer) = register(&mut d, "c", &["evt"], &["evt"]);
        peer.send_key("on").await.unwrap();
        wait_until(|| consumer.is_active("evt")).await;

        d.connect(source).await.unwrap();
        d.run().unwrap();
        tx.send(Bytes::from_static(b"not an envelope")).await.unwrap();
        tx.send(encode_event("evt", "ok").unwrap()).await.unwrap();
        tx.send(Bytes::from_static(br#"{"body":1}"#)).await.unwrap();
        drop(tx);

        wait_until(|| !d.is_running()).await;
        d.close().await;

        let metrics = d.metrics();
        assert_eq!(metrics.received, 3);
        assert_eq!(metrics.decode_failures, 2);
        assert_eq!(metrics.fanned_out, 1);
        assert_eq!(drain(&mut peer), vec![json!("ok")]);
    }

    /// Cancelling the parent token stops the dispatcher and its source
    #[tokio::test]
    async fn test_e2e_parent_cancel() {
        let parent = CancellationToken::new();
        let mut d = DispatcherBuilder::new(DispatcherConfig {
            workers: 2,
            ..Default::default()
        })
        .extractor(json_extractor())
        .cancel_token(parent.clone())
        .build()
        .unwrap();
        let (consumer, _peer) = register(&mut d, "c", &["a"], &["a"]);

        let source = MockEventSource::new(MockSourceConfig {
            keys: vec!["a".into()],
            rate_hz: 500.0,
            ..Default::default()
        });
        d.connect(source).await.unwrap();
        d.run().unwrap();
        wait_until(|| d.metrics().received > 0).await;

        parent.cancel();
        wait_until(|| !d.is_running()).await;
        assert!(d.close().await.is_empty());
        assert!(consumer.is_closed());
    }

    /// Dedup window readmits a key after the window rolls over
    #[tokio::test(start_paused = true)]
    async fn test_e2e_dedup_window_rollover() {
        let cache = Arc::new(DedupCache::new(Duration::from_millis(50)).unwrap());
        cache.run();
        let publisher = DedupPublisher::new(transport::LogPublisher::new("log"), Arc::clone(&cache));

        let send = |n: u32| encode_event("disk_full", &n).unwrap();
        assert_eq!(publisher.publish("disk_full", send(1)).await.unwrap(), PublishOutcome::Sent);
        assert_eq!(
            publisher.publish("disk_full", send(2)).await.unwrap(),
            PublishOutcome::Suppressed
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(publisher.publish("disk_full", send(3)).await.unwrap(), PublishOutcome::Sent);

        // Shrinking the window online takes effect on the next tick
        assert!(cache.update_online(Duration::from_millis(10)));
        assert_eq!(cache.window(), Duration::from_millis(10));

        cache.close().await;
        assert_eq!(publisher.inner().sent_count(), 2);
        assert!(cache.metrics().snapshot().clear_count >= 1);
    }

    /// Config file -> DispatcherConfig / MockSourceConfig -> running pipeline
    #[tokio::test(start_paused = true)]
    async fn test_e2e_config_driven_pipeline() {
        let raw = include_str!("../../../eventgate.example.toml");
        let mut engine =
            config_loader::ConfigLoader::load_from_str(raw, config_loader::ConfigFormat::Toml)
                .unwrap();
        // Clears never coincide with a 50ms source tick
        engine.dedup.window_ms = 7;

        let dispatcher_config = DispatcherConfig::from(&engine.dispatcher);
        assert_eq!(dispatcher_config.workers, 2);
        assert_eq!(dispatcher_config.dispatch_timeout, Some(Duration::from_millis(500)));

        let cache = Arc::new(DedupCache::new(engine.dedup.window()).unwrap());
        cache.run();
        let source = MockEventSource::new(MockSourceConfig::from(&engine.source))
            .with_dedup(Arc::clone(&cache))
            .with_max_ticks(6);
        let source_stats = source.stats();

        let mut d = DispatcherBuilder::new(dispatcher_config)
            .extractor(json_extractor())
            .build()
            .unwrap();

        let mut peers = Vec::new();
        for profile in &engine.consumers {
            let (session, peer) = ChannelSession::pair(profile.id.clone(), 64);
            let mut config = ConsumerConfig::new(profile.id.clone(), json_status_decoder());
            for key in &profile.handlers {
                config = config.handler(key.clone(), echo());
            }
            for (status, keys) in &profile.statuses {
                config = config.status(status.clone(), keys.iter().cloned());
            }
            let consumer = d.register_config(config, session).unwrap();
            peers.push((consumer, peer));
        }

        // ops-console goes on call; trading-desk stays unset
        let (ops, ops_peer) = &peers[1];
        assert_eq!(ops.id(), "ops-console");
        ops_peer.send_key("on_call").await.unwrap();
        wait_until(|| ops.is_active("disk_full")).await;

        d.connect(source).await.unwrap();
        d.run().unwrap();
        wait_until(|| !d.is_running()).await;
        assert!(d.close().await.is_empty());
        cache.close().await;

        // 6 ticks x burst 4, one publish per tick survives dedup
        assert_eq!(source_stats.generated(), 24);
        assert_eq!(source_stats.published(), 6);
        assert_eq!(source_stats.suppressed(), 18);

        // keys rotate order_updated, price_tick, disk_full
        let mut ops_peer = peers.remove(1).1;
        let received: Vec<serde_json::Value> = std::iter::from_fn(|| ops_peer.try_recv())
            .map(|raw| serde_json::from_slice(&raw).unwrap())
            .collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0]["seq"], 2);
        assert_eq!(received[1]["seq"], 5);

        let (desk, _) = &peers[0];
        assert_eq!(desk.metrics().delivered(), 0);
        assert_eq!(desk.metrics().gated(), 6);
    }
}
