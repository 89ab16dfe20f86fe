use std::sync::Arc;

use proptest::prelude::*;
use quantadb::store::Chain;
use quantadb::{ControlOp, DeviceConfig, DeviceSet, Layout, OpenMode, SparseStore, Whence};
use tokio_util::sync::CancellationToken;

const QUANTUM: usize = 64;
const QSET: usize = 4;
const SPAN: u64 = 2048;

fn write_all(chain: &mut Chain, mut offset: u64, mut data: &[u8]) {
    while !data.is_empty() {
        let n = chain.write(offset, data).unwrap();
        assert!(n > 0);
        offset += n as u64;
        data = &data[n..];
    }
}

fn write_strategy() -> impl Strategy<Value = (u64, Vec<u8>)> {
    (0..SPAN, proptest::collection::vec(any::<u8>(), 1..96))
}

proptest! {
    #[test]
    fn prop_last_writer_wins(writes in proptest::collection::vec(write_strategy(), 1..48)) {
        let mut chain = Chain::new(Layout::new(QUANTUM, QSET).unwrap(), None);
        let mut model: Vec<Option<u8>> = vec![None; (SPAN + 96) as usize];

        for (offset, data) in &writes {
            write_all(&mut chain, *offset, data);
            for (i, b) in data.iter().enumerate() {
                model[*offset as usize + i] = Some(*b);
            }
        }

        let size = model.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        prop_assert_eq!(chain.size(), size as u64);

        for (offset, expected) in model.iter().enumerate().take(size) {
            let mut buf = [0u8; 1];
            let n = chain.read(offset as u64, &mut buf);
            match expected {
                Some(b) => {
                    prop_assert_eq!(n, 1);
                    prop_assert_eq!(buf[0], *b);
                }
                // unwritten bytes are either a hole or the zero fill of a live block
                None => prop_assert!(n == 0 || buf[0] == 0),
            }
        }
    }

    #[test]
    fn prop_reads_past_size_are_empty(
        writes in proptest::collection::vec(write_strategy(), 0..16),
        extra in 0u64..10_000,
        len in 1usize..256,
    ) {
        let mut chain = Chain::new(Layout::new(QUANTUM, QSET).unwrap(), None);
        for (offset, data) in &writes {
            write_all(&mut chain, *offset, data);
        }
        let mut buf = vec![0u8; len];
        prop_assert_eq!(chain.read(chain.size() + extra, &mut buf), 0);
    }

    #[test]
    fn prop_trim_is_a_full_reset(writes in proptest::collection::vec(write_strategy(), 1..16)) {
        let layout = Layout::new(QUANTUM, QSET).unwrap();
        let mut chain = Chain::new(layout, None);
        for (offset, data) in &writes {
            write_all(&mut chain, *offset, data);
        }
        chain.trim(layout);

        let mut buf = [0u8; 8];
        for offset in (0..SPAN).step_by(7) {
            prop_assert_eq!(chain.read(offset, &mut buf), 0);
        }
        prop_assert_eq!(chain.block_count(), 0);

        let (offset, data) = &writes[0];
        write_all(&mut chain, *offset, data);
        let mut out = vec![0u8; data.len()];
        let mut read = 0;
        while read < data.len() {
            let n = chain.read(offset + read as u64, &mut out[read..]);
            prop_assert!(n > 0);
            read += n;
        }
        prop_assert_eq!(&out, data);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_full_block_writes_never_mix() {
    const WRITERS: u8 = 8;
    const BLOCKS: u64 = 16;
    const Q: usize = 256;

    let store = Arc::new(SparseStore::new(0, Layout::new(Q, 4).unwrap(), None));

    let tasks: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = store.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let payload = vec![writer + 1; Q];
                for round in 0..50u64 {
                    let block = (round * 7 + writer as u64) % BLOCKS;
                    let n = store
                        .write(block * Q as u64, &payload, &cancel)
                        .await
                        .unwrap();
                    assert_eq!(n, Q);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let cancel = CancellationToken::new();
    for block in 0..BLOCKS {
        let Some(content) = store.block_at(block * Q as u64, &cancel).await.unwrap() else {
            continue;
        };
        let first = content[0];
        assert!((1..=WRITERS).contains(&first));
        assert!(
            content.iter().all(|b| *b == first),
            "block {} mixes payloads",
            block
        );
    }
}

#[tokio::test]
async fn device_scenario_end_to_end() -> quantadb::Result<()> {
    let set = DeviceSet::new(DeviceConfig::new().devices(1).quantum(4096).qset(4))?;
    let mut handle = set.open(0, OpenMode::ReadWrite).await?;

    assert_eq!(handle.write(b"hello").await?, 5);
    handle.seek(0, Whence::Set).await?;
    assert_eq!(handle.read(5).await?, b"hello");
    assert!(handle.read(10).await?.is_empty());

    handle.seek(20000, Whence::Set).await?;
    assert_eq!(handle.write(&[1u8; 10]).await?, 10);
    assert_eq!(handle.seek(0, Whence::End).await?, 20010);

    handle.seek(0, Whence::Set).await?;
    assert_eq!(handle.read(5).await?, b"hello");

    assert_eq!(handle.control(ControlOp::ExchangeQuantum(512)).await?, Some(4096));
    assert_eq!(handle.control(ControlOp::ExchangeQuantum(1024)).await?, Some(512));

    handle.close()?;
    set.shutdown().await
}
