use std::fmt;

use super::chain::Chain;

/// Point-in-time description of a store's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReport {
    pub index: usize,
    pub quantum: usize,
    pub qset: usize,
    pub size: u64,
    /// Live blocks per node, head first
    pub nodes: Vec<usize>,
    pub blocks: usize,
    pub mapped_views: usize,
    /// Occupied slots of the last node
    pub tail: Vec<usize>,
}

impl StoreReport {
    pub(crate) fn capture(index: usize, chain: &Chain, mapped_views: usize) -> Self {
        let layout = chain.layout();
        let nodes = chain.nodes();
        Self {
            index,
            quantum: layout.quantum(),
            qset: layout.qset(),
            size: chain.size(),
            nodes: nodes.iter().map(|node| node.block_count()).collect(),
            blocks: chain.block_count(),
            mapped_views,
            tail: nodes
                .last()
                .map(|node| node.occupied().collect())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for StoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Device {}: qset {}, q {}, sz {}",
            self.index, self.qset, self.quantum, self.size
        )?;
        for (i, blocks) in self.nodes.iter().enumerate() {
            writeln!(f, "  node {}: {} blocks", i, blocks)?;
        }
        // only the last node's slots, to keep the dump short
        for slot in &self.tail {
            writeln!(f, "    {:4}", slot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Layout;

    #[test]
    fn test_report_render() {
        let mut chain = Chain::new(Layout::new(4, 2).unwrap(), None);
        chain.write(0, b"a").unwrap();
        chain.write(12, b"b").unwrap();

        let report = StoreReport::capture(3, &chain, 0);
        assert_eq!(report.nodes, vec![1, 1]);
        assert_eq!(report.tail, vec![1]);
        assert_eq!(
            report.to_string(),
            "Device 3: qset 2, q 4, sz 13\n  node 0: 1 blocks\n  node 1: 1 blocks\n       1\n"
        );
    }
}
