use std::fmt;

use crate::*;

/// Rule in OUTPUT that sends locally generated traffic through [`CHAIN`].
const JUMP_RULE: &str = "-j node-translation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The desired ruleset hashes the same as the last one applied.
    Unchanged,
    Applied { rules: usize },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Unchanged => f.write_str("chain already up to date"),
            Outcome::Applied { rules } => write!(f, "chain {CHAIN} replaced with {rules} rules"),
        }
    }
}

pub struct Operator<B> {
    backend: B,
    translator: Option<Translator>,
    state: ControllerState,
}

impl<B: Backend> Operator<B> {
    pub fn new(backend: B, translator: Option<Translator>) -> Self {
        Self { backend, translator, state: ControllerState::default() }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Makes sure OUTPUT in the nat table jumps to the managed chain, creating
    /// the chain first on a fresh host. Cheap when the rule is already there.
    ///
    /// Returns `true` when the chain had to be created. A new chain is empty,
    /// so the last applied hash is forgotten as soon as it exists.
    pub fn ensure_jump_rule(&mut self) -> Result<bool> {
        if self.backend.rule_exists(NAT_TABLE, OUTPUT_CHAIN, JUMP_RULE) {
            return Ok(false);
        }
        let created = !self.backend.chain_exists(NAT_TABLE, CHAIN);
        if created {
            info!("creating chain {CHAIN} in table {NAT_TABLE}");
            self.backend.new_chain(NAT_TABLE, CHAIN)?;
            self.state.reset();
        }
        info!("inserting jump to {CHAIN} at the head of {NAT_TABLE}/{OUTPUT_CHAIN}");
        self.backend.insert_rule(NAT_TABLE, OUTPUT_CHAIN, JUMP_RULE)?;
        Ok(created)
    }

    /// One reconcile pass. Leaves the kernel untouched when anything before
    /// the restore fails, and only remembers the new hash once the restore
    /// succeeded so a failed apply is retried on the next trigger.
    pub fn reconcile<L: NodeLister>(&mut self, reason: &str, nodes: &L) -> Result<Outcome> {
        debug!("reconciling ({reason})");

        self.ensure_jump_rule().map_err(|e| Error::JumpRule {
            chain: OUTPUT_CHAIN.to_owned(),
            source: Box::new(e),
        })?;

        let nodes = nodes.list()?;
        let canonical =
            RuleSet::compile(nodes.iter().map(|n| &**n), self.translator.as_ref()).canonicalize();

        if self.state.is_current(&canonical.hash) {
            debug!("ruleset unchanged ({} rules, hash {})", canonical.lines.len(), canonical.hash);
            return Ok(Outcome::Unchanged);
        }

        info!(
            "applying {} rules to {NAT_TABLE}/{CHAIN} ({reason}, {} nodes listed)",
            canonical.lines.len(),
            nodes.len()
        );
        self.backend.restore(NAT_TABLE, &canonical.restore_document())?;

        let outcome = Outcome::Applied { rules: canonical.lines.len() };
        self.state.commit(canonical.hash);
        Ok(outcome)
    }

    /// Removes every jump to the managed chain and the chain itself.
    pub fn cleanup(&mut self) -> Result<()> {
        while self.backend.rule_exists(NAT_TABLE, OUTPUT_CHAIN, JUMP_RULE) {
            info!("deleting jump to {CHAIN} from {NAT_TABLE}/{OUTPUT_CHAIN}");
            self.backend.delete_rule(NAT_TABLE, OUTPUT_CHAIN, JUMP_RULE)?;
        }
        if self.backend.chain_exists(NAT_TABLE, CHAIN) {
            info!("deleting chain {CHAIN} from {NAT_TABLE}");
            self.backend.delete_chain(NAT_TABLE, CHAIN)?;
        }
        self.state.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::res::fixtures::*;

    struct BrokenCache;

    impl NodeLister for BrokenCache {
        fn list(&self) -> Result<Vec<Arc<CoreNode>>> {
            Err(Error::ListNodes("cache not synced".into()))
        }
    }

    fn operator(backend: MemoryBackend) -> Operator<MemoryBackend> {
        let translator = OctetPrefix::new("10.0.0.0/16".parse().unwrap()).unwrap();
        Operator::new(backend, Some(translator.into()))
    }

    fn two_nodes() -> Vec<CoreNode> {
        vec![
            external("node-a", "203.0.113.10", 10250),
            external("node-b", "203.0.113.11", 6443),
        ]
    }

    #[test]
    fn jump_rule_targets_managed_chain() {
        assert_eq!(JUMP_RULE, format!("-j {CHAIN}"));
    }

    #[test]
    fn first_reconcile_bootstraps_and_applies() {
        let mut op = operator(MemoryBackend::default());

        let outcome = op.reconcile("test", &two_nodes()).unwrap();

        assert_eq!(outcome, Outcome::Applied { rules: 2 });
        assert_eq!(op.backend().rules(NAT_TABLE, OUTPUT_CHAIN), vec![JUMP_RULE]);
        assert_eq!(
            op.backend().rules(NAT_TABLE, CHAIN),
            vec![
                "-p tcp -d 203.0.113.10 --dport 10250 -j DNAT --to 10.0.113.10:10250",
                "-p tcp -d 203.0.113.11 --dport 6443 -j DNAT --to 10.0.113.11:6443",
            ]
        );
        assert!(op.state().last_applied_hash().is_some());
    }

    #[test]
    fn unchanged_nodes_do_not_restore_twice() {
        let mut op = operator(MemoryBackend::default());
        let nodes = two_nodes();

        assert_eq!(op.reconcile("timer", &nodes).unwrap(), Outcome::Applied { rules: 2 });
        let reversed = nodes.iter().rev().cloned().collect::<Vec<_>>();
        assert_eq!(op.reconcile("node updated", &reversed).unwrap(), Outcome::Unchanged);

        assert_eq!(op.backend().restores().len(), 1);
    }

    #[test]
    fn changed_nodes_replace_whole_chain() {
        let mut op = operator(MemoryBackend::default());
        op.reconcile("timer", &two_nodes()).unwrap();

        let nodes = vec![external("node-c", "203.0.113.12", 10250)];
        assert_eq!(op.reconcile("node added", &nodes).unwrap(), Outcome::Applied { rules: 1 });

        let restores = op.backend().restores();
        assert_eq!(restores.len(), 2);
        for doc in restores {
            assert!(doc.starts_with("*nat\n:node-translation - [0:0]\n"));
            assert!(doc.ends_with("COMMIT\n"));
        }
        assert_eq!(
            op.backend().rules(NAT_TABLE, CHAIN),
            vec!["-p tcp -d 203.0.113.12 --dport 10250 -j DNAT --to 10.0.113.12:10250"]
        );
    }

    #[test]
    fn bad_node_does_not_block_the_rest() {
        let mut op = operator(MemoryBackend::default());
        let mut nodes = two_nodes();
        nodes.push(node("private", &[("InternalIP", "10.1.1.1")], 10250));

        assert_eq!(op.reconcile("timer", &nodes).unwrap(), Outcome::Applied { rules: 2 });
        assert!(op
            .backend()
            .rules(NAT_TABLE, CHAIN)
            .iter()
            .all(|r| !r.contains("10.1.1.1")));
    }

    #[test]
    fn failed_restore_is_retried() {
        let mut op = operator(MemoryBackend::default().failing_restores(true));
        let nodes = two_nodes();

        assert!(op.reconcile("timer", &nodes).is_err());
        assert!(op.state().last_applied_hash().is_none());

        op.backend_mut().set_failing_restores(false);
        assert_eq!(op.reconcile("timer", &nodes).unwrap(), Outcome::Applied { rules: 2 });
        assert_eq!(op.backend().restores().len(), 2);
    }

    #[test]
    fn listing_failure_leaves_kernel_alone() {
        let mut op = operator(MemoryBackend::default());
        op.reconcile("timer", &two_nodes()).unwrap();
        let hash = op.state().last_applied_hash().map(str::to_owned);

        assert!(matches!(op.reconcile("timer", &BrokenCache), Err(Error::ListNodes(_))));
        assert_eq!(op.backend().restores().len(), 1);
        assert_eq!(op.state().last_applied_hash().map(str::to_owned), hash);
    }

    #[test]
    fn guard_failure_aborts_before_listing() {
        let mut op = operator(MemoryBackend::default().failing_inserts(true));

        let err = op.reconcile("timer", &two_nodes()).unwrap_err();
        assert!(matches!(err, Error::JumpRule { .. }), "{err}");
        assert!(op.backend().restores().is_empty());
    }

    #[test]
    fn jump_rule_is_restored_after_external_flush() {
        let mut op = operator(MemoryBackend::default());
        let nodes = two_nodes();
        op.reconcile("timer", &nodes).unwrap();

        op.backend_mut().flush(NAT_TABLE, OUTPUT_CHAIN);
        assert_eq!(op.reconcile("timer", &nodes).unwrap(), Outcome::Unchanged);
        assert_eq!(op.backend().rules(NAT_TABLE, OUTPUT_CHAIN), vec![JUMP_RULE]);
    }

    #[test]
    fn deleted_chain_is_refilled() {
        let mut op = operator(MemoryBackend::default());
        let nodes = two_nodes();
        op.reconcile("timer", &nodes).unwrap();
        let hash = op.state().last_applied_hash().map(str::to_owned);

        op.backend_mut().delete_rule(NAT_TABLE, OUTPUT_CHAIN, JUMP_RULE).unwrap();
        op.backend_mut().delete_chain(NAT_TABLE, CHAIN).unwrap();

        assert_eq!(op.reconcile("timer", &nodes).unwrap(), Outcome::Applied { rules: 2 });
        assert_eq!(op.backend().rules(NAT_TABLE, OUTPUT_CHAIN), vec![JUMP_RULE]);
        assert_eq!(op.backend().rules(NAT_TABLE, CHAIN).len(), 2);
        assert_eq!(op.state().last_applied_hash().map(str::to_owned), hash);

        // back to normal once refilled
        assert_eq!(op.reconcile("timer", &nodes).unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn refill_failure_is_retried() {
        let mut op = operator(MemoryBackend::default());
        let nodes = two_nodes();
        op.reconcile("timer", &nodes).unwrap();

        op.backend_mut().delete_rule(NAT_TABLE, OUTPUT_CHAIN, JUMP_RULE).unwrap();
        op.backend_mut().delete_chain(NAT_TABLE, CHAIN).unwrap();
        op.backend_mut().set_failing_restores(true);
        assert!(op.reconcile("timer", &nodes).is_err());

        // the jump is back, so only the forgotten hash tells the chain is empty
        op.backend_mut().set_failing_restores(false);
        assert!(op.backend().rules(NAT_TABLE, CHAIN).is_empty());
        assert_eq!(op.reconcile("timer", &nodes).unwrap(), Outcome::Applied { rules: 2 });
    }

    #[test]
    fn chain_recreated_before_failed_jump_insert_is_refilled() {
        let mut op = operator(MemoryBackend::default());
        let nodes = two_nodes();
        op.reconcile("timer", &nodes).unwrap();

        op.backend_mut().delete_rule(NAT_TABLE, OUTPUT_CHAIN, JUMP_RULE).unwrap();
        op.backend_mut().delete_chain(NAT_TABLE, CHAIN).unwrap();
        op.backend_mut().set_failing_inserts(true);
        assert!(matches!(op.reconcile("timer", &nodes), Err(Error::JumpRule { .. })));
        assert!(op.backend().chain_exists(NAT_TABLE, CHAIN));

        op.backend_mut().set_failing_inserts(false);
        assert_eq!(op.reconcile("timer", &nodes).unwrap(), Outcome::Applied { rules: 2 });
        assert_eq!(op.backend().rules(NAT_TABLE, CHAIN).len(), 2);
    }

    #[test]
    fn ensure_jump_rule_is_idempotent() {
        let mut op = operator(MemoryBackend::default());
        assert!(op.ensure_jump_rule().unwrap());
        assert!(!op.ensure_jump_rule().unwrap());
        assert_eq!(op.backend().rules(NAT_TABLE, OUTPUT_CHAIN), vec![JUMP_RULE]);
    }

    #[test]
    fn empty_cluster_empties_chain() {
        let mut op = operator(MemoryBackend::default());
        op.reconcile("timer", &two_nodes()).unwrap();

        let outcome = op.reconcile("node deleted", &Vec::<CoreNode>::new()).unwrap();
        assert_eq!(outcome, Outcome::Applied { rules: 0 });
        assert!(op.backend().rules(NAT_TABLE, CHAIN).is_empty());
    }

    #[test]
    fn without_translator_rules_only_match() {
        let mut op = Operator::new(MemoryBackend::default(), None);
        op.reconcile("timer", &two_nodes()).unwrap();
        assert_eq!(
            op.backend().rules(NAT_TABLE, CHAIN),
            vec!["-p tcp -d 203.0.113.10 --dport 10250", "-p tcp -d 203.0.113.11 --dport 6443"]
        );
    }

    #[test]
    fn cleanup_removes_everything() {
        let mut op = operator(MemoryBackend::default());
        op.reconcile("timer", &two_nodes()).unwrap();

        op.cleanup().unwrap();

        assert!(op.backend().rules(NAT_TABLE, OUTPUT_CHAIN).is_empty());
        assert!(!op.backend().chain_exists(NAT_TABLE, CHAIN));
        assert!(op.state().last_applied_hash().is_none());

        // next reconcile starts from scratch
        assert_eq!(op.reconcile("timer", &two_nodes()).unwrap(), Outcome::Applied { rules: 2 });
    }
}
