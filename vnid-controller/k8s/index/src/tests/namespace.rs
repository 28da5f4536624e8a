use super::*;

fn svc_0(ns: &str) -> Service {
    mk_svc(ns, "svc-0", "uid-0", Some("10.96.0.10"), [("TCP", 80)])
}

#[tokio::test]
async fn populate_installs_assignments() {
    let _trace = trace_init();
    let fake = Fake::new();
    fake.state.lock().netnss = Some(vec![
        NetNamespace::new("ns-0", 1),
        NetNamespace::new("ns-1", 1),
        NetNamespace::new("default", GLOBAL_VNID),
    ]);
    let node = mk_node(&fake);

    node.populate().await.expect("populate must succeed");
    assert_eq!(node.vnids().get_vnid("ns-0"), Ok(1));
    assert_eq!(node.vnids().namespaces(1), vec!["ns-0", "ns-1"]);
    assert_eq!(node.vnids().get_vnid("default"), Ok(GLOBAL_VNID));
    assert!(fake.calls().is_empty(), "populating must not touch the dataplane");
}

#[tokio::test]
async fn start_fails_when_assignments_cannot_be_listed() {
    let _trace = trace_init();
    let fake = Fake::new();
    let node = mk_node(&fake);
    let (_signal, shutdown) = drain::channel();

    node.start(shutdown).await.expect_err("start must fail");
    let state = fake.state.lock();
    assert_eq!(state.netns_subscriptions, 0);
    assert_eq!(state.service_subscriptions, 0);
}

#[tokio::test]
async fn added_reconciles_namespace() {
    let _trace = trace_init();
    let fake = Fake::new();
    {
        let mut state = fake.state.lock();
        state.pods.insert(
            "ns-0".to_string(),
            PodPartition {
                running: vec![mk_pod("ns-0", "pod-0")],
                other: vec![mk_pod("ns-0", "pod-1")],
            },
        );
        state.services.insert(
            "ns-0".to_string(),
            vec![
                svc_0("ns-0"),
                mk_svc("ns-0", "headless", "uid-1", Some("None"), [("TCP", 80)]),
            ],
        );
    }
    let node = mk_node(&fake);

    node.handle_netns_events(vec![Event::Added(NetNamespace::new("ns-0", 5))])
        .await;

    assert_eq!(node.vnids().get_vnid("ns-0"), Ok(5));
    assert_eq!(
        fake.calls(),
        vec![
            Call::LocalPods("ns-0".to_string()),
            Call::ListServices("ns-0".to_string()),
            Call::UpdatePod {
                pod: "pod-0".to_string(),
                vnid: Some(5),
            },
            Call::DeletePod("pod-1".to_string()),
            Call::DeleteServiceRules("svc-0".to_string()),
            Call::AddServiceRules {
                service: "svc-0".to_string(),
                vnid: 5,
            },
        ]
    );
}

#[tokio::test]
async fn duplicate_added_is_ignored() {
    let _trace = trace_init();
    let fake = Fake::new();
    let node = mk_node(&fake);

    let added = Event::Added(NetNamespace::new("ns-0", 3));
    node.handle_netns_events(vec![added.clone(), added.clone()])
        .await;
    node.handle_netns_events(vec![added]).await;

    let passes = fake
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::LocalPods(_)))
        .count();
    assert_eq!(passes, 1);
    assert_eq!(node.vnids().get_vnid("ns-0"), Ok(3));
}

#[tokio::test]
async fn reassignment_reconciles_again() {
    let _trace = trace_init();
    let fake = Fake::new();
    fake.state
        .lock()
        .services
        .insert("ns-0".to_string(), vec![svc_0("ns-0")]);
    let node = mk_node(&fake);

    node.handle_netns_events(vec![
        Event::Added(NetNamespace::new("ns-0", 3)),
        Event::Added(NetNamespace::new("ns-0", 4)),
    ])
    .await;

    assert_eq!(node.vnids().get_vnid("ns-0"), Ok(4));
    assert!(node.vnids().namespaces(3).is_empty());
    let added = fake
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::AddServiceRules { vnid, .. } => Some(vnid),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(added, vec![3, 4]);
}

#[tokio::test]
async fn removal_reconciles_before_unassigning() {
    let _trace = trace_init();
    let fake = Fake::new();
    {
        let mut state = fake.state.lock();
        state.pods.insert(
            "a".to_string(),
            PodPartition {
                running: vec![mk_pod("a", "pod-0")],
                other: vec![],
            },
        );
        state.services.insert("a".to_string(), vec![svc_0("a")]);
    }
    let node = mk_node(&fake);

    node.handle_netns_events(vec![
        Event::Added(NetNamespace::new("a", 1)),
        Event::Removed(NetNamespace::new("a", 1)),
    ])
    .await;

    assert!(node.vnids().get_vnid("a").is_err());
    assert!(node.vnids().namespaces(1).is_empty());

    let pass = vec![
        Call::LocalPods("a".to_string()),
        Call::ListServices("a".to_string()),
        Call::UpdatePod {
            pod: "pod-0".to_string(),
            vnid: Some(1),
        },
        Call::DeleteServiceRules("svc-0".to_string()),
    ];
    let mut expected = pass.clone();
    expected.push(Call::AddServiceRules {
        service: "svc-0".to_string(),
        vnid: 1,
    });
    // The old VNID is still assigned while the removal is reconciled; services fall back to the
    // global VNID.
    expected.extend(pass);
    expected.push(Call::AddServiceRules {
        service: "svc-0".to_string(),
        vnid: GLOBAL_VNID,
    });
    assert_eq!(fake.calls(), expected);
}

#[tokio::test]
async fn removal_of_unknown_namespace_is_reconciled() {
    let _trace = trace_init();
    let fake = Fake::new();
    fake.state
        .lock()
        .services
        .insert("ns-x".to_string(), vec![svc_0("ns-x")]);
    let node = mk_node(&fake);

    node.handle_netns_events(vec![Event::Removed(NetNamespace::new("ns-x", 7))])
        .await;

    assert!(node.vnids().get_vnid("ns-x").is_err());
    assert_eq!(
        fake.calls().last(),
        Some(&Call::AddServiceRules {
            service: "svc-0".to_string(),
            vnid: GLOBAL_VNID,
        })
    );
}

#[tokio::test]
async fn pod_failures_are_isolated() {
    let _trace = trace_init();
    let fake = Fake::new();
    {
        let mut state = fake.state.lock();
        state.pods.insert(
            "ns-0".to_string(),
            PodPartition {
                running: vec![
                    mk_pod("ns-0", "pod-1"),
                    mk_pod("ns-0", "pod-2"),
                    mk_pod("ns-0", "pod-3"),
                ],
                other: vec![mk_pod("ns-0", "pod-4"), mk_pod("ns-0", "pod-5")],
            },
        );
        state.services.insert("ns-0".to_string(), vec![svc_0("ns-0")]);
        state.failing.insert("pod-2".to_string());
        state.failing.insert("pod-4".to_string());
    }
    let node = mk_node(&fake);

    node.handle_netns_events(vec![Event::Added(NetNamespace::new("ns-0", 2))])
        .await;

    let touched = fake
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::UpdatePod { pod, .. } | Call::DeletePod(pod) => Some(pod),
            Call::AddServiceRules { service, .. } => Some(service),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        touched,
        vec!["pod-1", "pod-2", "pod-3", "pod-4", "pod-5", "svc-0"]
    );
    assert_eq!(node.metrics.failures("update_pod"), 1);
    assert_eq!(node.metrics.failures("delete_pod"), 1);
}

#[tokio::test]
async fn service_rule_failures_are_isolated() {
    let _trace = trace_init();
    let fake = Fake::new();
    {
        let mut state = fake.state.lock();
        state.services.insert(
            "ns-0".to_string(),
            vec![
                svc_0("ns-0"),
                mk_svc("ns-0", "svc-1", "uid-1", Some("10.96.0.11"), [("UDP", 53)]),
            ],
        );
        state.failing.insert("svc-0".to_string());
    }
    let node = mk_node(&fake);

    node.handle_netns_events(vec![Event::Added(NetNamespace::new("ns-0", 2))])
        .await;

    assert_eq!(
        fake.calls()[2..],
        [
            Call::DeleteServiceRules("svc-0".to_string()),
            Call::AddServiceRules {
                service: "svc-0".to_string(),
                vnid: 2,
            },
            Call::DeleteServiceRules("svc-1".to_string()),
            Call::AddServiceRules {
                service: "svc-1".to_string(),
                vnid: 2,
            },
        ]
    );
    assert_eq!(node.metrics.failures("delete_service_rules"), 1);
    assert_eq!(node.metrics.failures("add_service_rules"), 1);
}

#[tokio::test]
async fn listing_failures_do_not_abort_the_batch() {
    let _trace = trace_init();
    let fake = Fake::new();
    fake.state.lock().fail_listing = true;
    let node = mk_node(&fake);

    node.handle_netns_events(vec![
        Event::Added(NetNamespace::new("ns-0", 1)),
        Event::Added(NetNamespace::new("ns-1", 2)),
    ])
    .await;

    assert_eq!(node.vnids().get_vnid("ns-0"), Ok(1));
    assert_eq!(node.vnids().get_vnid("ns-1"), Ok(2));
    assert_eq!(
        fake.calls(),
        vec![
            Call::LocalPods("ns-0".to_string()),
            Call::ListServices("ns-0".to_string()),
            Call::LocalPods("ns-1".to_string()),
            Call::ListServices("ns-1".to_string()),
        ]
    );
    assert_eq!(node.metrics.failures("list_pods"), 2);
    assert_eq!(node.metrics.failures("list_services"), 2);
}

#[tokio::test(start_paused = true)]
async fn watch_resubscribes_after_failure() {
    let _trace = trace_init();
    let fake = Fake::new();
    {
        let mut state = fake.state.lock();
        state.netns_watches.push_back(vec![
            Ok(vec![Event::Added(NetNamespace::new("ns-0", 1))]),
            Err(anyhow!("connection reset")),
        ]);
        state.netns_watches.push_back(vec![Ok(vec![
            Event::Added(NetNamespace::new("ns-1", 2)),
            Event::Removed(NetNamespace::new("ns-0", 1)),
        ])]);
    }
    let node = mk_node(&fake);
    let (signal, shutdown) = drain::channel();
    let task = tokio::spawn(node.clone().watch_net_namespaces(shutdown));

    time::sleep(time::Duration::from_millis(500)).await;
    assert_eq!(node.vnids().get_vnid("ns-0"), Ok(1));
    assert_eq!(fake.state.lock().netns_subscriptions, 1);

    time::sleep(time::Duration::from_secs(1)).await;
    assert!(node.vnids().get_vnid("ns-0").is_err());
    assert_eq!(node.vnids().get_vnid("ns-1"), Ok(2));
    assert_eq!(fake.state.lock().netns_subscriptions, 2);

    signal.drain().await;
    task.await.expect("watch must not panic");
}

#[tokio::test(start_paused = true)]
async fn start_programs_existing_services() {
    let _trace = trace_init();
    let fake = Fake::new();
    {
        let mut state = fake.state.lock();
        state.netnss = Some(vec![NetNamespace::new("ns-0", 4)]);
        state.service_watches.push_back(vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(svc_0("ns-0"))),
            Ok(watcher::Event::InitDone),
        ]);
    }
    let node = mk_node(&fake);
    let (signal, shutdown) = drain::channel();

    node.start(shutdown).await.expect("start must succeed");
    time::sleep(time::Duration::from_millis(100)).await;

    assert_eq!(
        fake.calls(),
        vec![Call::AddServiceRules {
            service: "svc-0".to_string(),
            vnid: 4,
        }]
    );
    {
        let state = fake.state.lock();
        assert_eq!(state.netns_subscriptions, 1);
        assert_eq!(state.service_subscriptions, 1);
    }

    signal.drain().await;
}
