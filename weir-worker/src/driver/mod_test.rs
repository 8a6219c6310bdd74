use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};

use weir_core::plan::{FeedDescriptor, OperatorDescriptor};

use super::*;
use crate::feed::FeedProvider;
use crate::fixtures::{self, Recorded, StaticFeedProvider};
use crate::operator::OperatorTree;

async fn spawn_driver(
    provider: StaticFeedProvider, root: OperatorDescriptor, sink: &Recorded,
) -> Result<(watch::Sender<bool>, mpsc::Receiver<DriverExit>)> {
    let registry = fixtures::test_operators(sink);
    let tree = OperatorTree::build(&registry, &root)?;
    let partition = provider.open(&FeedDescriptor::default(), "p0").await?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let (exits_tx, exits_rx) = mpsc::channel(10);
    Driver::new(Arc::new("plan-a".to_string()), "p0".into(), partition, tree, stop_rx, exits_tx).spawn();
    Ok((stop_tx, exits_rx))
}

fn static_partition(tuples: Vec<crate::tuple::Tuple>) -> StaticFeedProvider {
    let mut partitions = HashMap::new();
    partitions.insert("p0".to_string(), tuples);
    StaticFeedProvider::new(partitions)
}

async fn await_exit(exits_rx: &mut mpsc::Receiver<DriverExit>) -> DriverExit {
    tokio::time::timeout(Duration::from_secs(5), exits_rx.recv())
        .await
        .expect("timeout awaiting driver exit")
        .expect("driver exit channel closed without an exit report")
}

#[tokio::test]
async fn driver_handles_tuples_sequentially_to_end_of_stream() -> Result<()> {
    let sink: Recorded = Default::default();
    let provider = static_partition(vec![fixtures::value_tuple("t1"), fixtures::value_tuple("t2"), fixtures::value_tuple("t3")]);
    let mut root = fixtures::descriptor("recording", "parent");
    root.children.push(fixtures::descriptor("recording", "child"));
    let (_stop_tx, mut exits_rx) = spawn_driver(provider, root, &sink).await?;

    let exit = await_exit(&mut exits_rx).await;

    assert!(matches!(exit.outcome, DriverOutcome::EndOfStream), "unexpected outcome, got {:?}, expected EndOfStream", exit.outcome);
    assert!(exit.plan.as_str() == "plan-a", "unexpected plan in exit report, got {}, expected plan-a", exit.plan);
    assert!(exit.partition == "p0", "unexpected partition in exit report, got {}, expected p0", exit.partition);
    let recorded = sink.lock().expect("recorded sink lock poisoned");
    let tags: Vec<&str> = recorded.iter().map(|(tag, _)| tag.as_str()).collect();
    let expected = vec!["parent", "child", "parent", "child", "parent", "child"];
    assert!(tags == expected, "tuples should be fully forwarded one at a time, got {:?}, expected {:?}", tags, expected);
    let values: Vec<&crate::tuple::Tuple> = recorded.iter().map(|(_, tuple)| tuple).collect();
    assert!(
        values[0] == values[1] && *values[0] == fixtures::value_tuple("t1"),
        "parent and child should observe the same first tuple"
    );
    assert!(*values[2] == fixtures::value_tuple("t2"), "second tuple should only be pulled after the first is fully handled");
    Ok(())
}

#[tokio::test]
async fn driver_stops_cooperatively() -> Result<()> {
    let sink: Recorded = Default::default();
    let provider = static_partition(vec![fixtures::value_tuple("t1")]).hold_open();
    let root = fixtures::descriptor("recording", "root");
    let (stop_tx, mut exits_rx) = spawn_driver(provider, root, &sink).await?;

    // Give the driver time to drain the partition and block on the feed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(true)?;
    let exit = await_exit(&mut exits_rx).await;

    assert!(matches!(exit.outcome, DriverOutcome::Stopped), "unexpected outcome, got {:?}, expected Stopped", exit.outcome);
    let recorded = sink.lock().expect("recorded sink lock poisoned");
    assert!(recorded.len() == 1, "the tuple served before the stop should have been handled, got {} records", recorded.len());
    Ok(())
}

#[tokio::test]
async fn driver_fails_on_operator_error() -> Result<()> {
    let sink: Recorded = Default::default();
    let provider = static_partition(vec![fixtures::value_tuple("t1")]);
    let root = fixtures::descriptor("failing", "root");
    let (_stop_tx, mut exits_rx) = spawn_driver(provider, root, &sink).await?;

    let exit = await_exit(&mut exits_rx).await;

    let err = match exit.outcome {
        DriverOutcome::Failed(err) => format!("{:?}", err),
        other => panic!("unexpected outcome, got {:?}, expected Failed", other),
    };
    assert!(err.contains("error handling tuple"), "unexpected failure error, got {}", err);
    Ok(())
}

#[tokio::test]
async fn driver_fails_before_tuples_on_bad_initialization() -> Result<()> {
    let sink: Recorded = Default::default();
    let provider = static_partition(vec![fixtures::value_tuple("t1")]);
    let mut root = fixtures::descriptor("recording", "root");
    root.children.push(fixtures::descriptor("bad_init", "child"));
    let (_stop_tx, mut exits_rx) = spawn_driver(provider, root, &sink).await?;

    let exit = await_exit(&mut exits_rx).await;

    let err = match exit.outcome {
        DriverOutcome::Failed(err) => format!("{:?}", err),
        other => panic!("unexpected outcome, got {:?}, expected Failed", other),
    };
    assert!(err.contains("error initializing operator tree"), "unexpected failure error, got {}", err);
    let recorded = sink.lock().expect("recorded sink lock poisoned");
    assert!(recorded.is_empty(), "no tuple should be handled when initialization fails, got {} records", recorded.len());
    Ok(())
}
