use std::collections::BTreeMap;

use crate::{logging::*, Error, Executor, Result};

/// The firewall operations the reconciler needs. `rule` is an iptables rule
/// specification without the chain, e.g. `-j node-translation`.
pub trait Backend {
    fn rule_exists(&self, table: &str, chain: &str, rule: &str) -> bool;
    fn chain_exists(&self, table: &str, chain: &str) -> bool;
    fn new_chain(&mut self, table: &str, chain: &str) -> Result<()>;
    fn insert_rule(&mut self, table: &str, chain: &str, rule: &str) -> Result<()>;
    fn delete_rule(&mut self, table: &str, chain: &str, rule: &str) -> Result<()>;
    /// Flushes and removes a user-defined chain.
    fn delete_chain(&mut self, table: &str, chain: &str) -> Result<()>;
    /// Loads an iptables-save document for `table` in one transaction,
    /// leaving chains the document does not mention untouched.
    fn restore(&mut self, table: &str, document: &str) -> Result<()>;
}

pub struct IptablesBackend {
    executor: Executor,
}

impl IptablesBackend {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    fn iptables(&self, table: &str, op: &str, chain: &str, rule: &str) -> Result<String> {
        let args = ["-w", "-t", table, op, chain]
            .into_iter()
            .chain(rule.split_whitespace())
            .collect::<Vec<_>>();
        self.executor.run(&self.executor.iptables, &args)
    }
}

impl Backend for IptablesBackend {
    fn rule_exists(&self, table: &str, chain: &str, rule: &str) -> bool {
        match self.iptables(table, "-C", chain, rule) {
            Ok(_) => true,
            Err(e) => {
                debug!("rule `{rule}` not found in {table}/{chain}: {e}");
                false
            }
        }
    }

    fn chain_exists(&self, table: &str, chain: &str) -> bool {
        self.iptables(table, "-S", chain, "").is_ok()
    }

    fn new_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        self.iptables(table, "-N", chain, "")?;
        Ok(())
    }

    fn insert_rule(&mut self, table: &str, chain: &str, rule: &str) -> Result<()> {
        self.iptables(table, "-I", chain, rule)?;
        Ok(())
    }

    fn delete_rule(&mut self, table: &str, chain: &str, rule: &str) -> Result<()> {
        self.iptables(table, "-D", chain, rule)?;
        Ok(())
    }

    fn delete_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        self.iptables(table, "-F", chain, "")?;
        self.iptables(table, "-X", chain, "")?;
        Ok(())
    }

    fn restore(&mut self, table: &str, document: &str) -> Result<()> {
        let output = self.executor.run_with_input(
            &self.executor.iptables_restore,
            &["--noflush", "--verbose", "--table", table],
            document,
        )?;
        if !output.is_empty() {
            debug!("iptables-restore: {output}");
        }
        Ok(())
    }
}

/// An in-memory table set that interprets restore documents the way
/// `iptables-restore --noflush` does. Built-in chains always exist.
#[derive(Default, Debug)]
pub struct MemoryBackend {
    chains: BTreeMap<(String, String), Vec<String>>,
    restores: Vec<String>,
    fail_inserts: bool,
    fail_restores: bool,
}

const BUILTIN_CHAINS: &[&str] = &["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"];

impl MemoryBackend {
    pub fn failing_inserts(self, fail: bool) -> Self {
        Self { fail_inserts: fail, ..self }
    }

    pub fn failing_restores(self, fail: bool) -> Self {
        Self { fail_restores: fail, ..self }
    }

    pub fn set_failing_inserts(&mut self, fail: bool) {
        self.fail_inserts = fail;
    }

    pub fn set_failing_restores(&mut self, fail: bool) {
        self.fail_restores = fail;
    }

    /// Every document handed to `restore`, including failed attempts.
    pub fn restores(&self) -> &[String] {
        &self.restores
    }

    pub fn rules(&self, table: &str, chain: &str) -> Vec<String> {
        self.chains.get(&key(table, chain)).cloned().unwrap_or_default()
    }

    /// Simulates another tool flushing a chain behind our back.
    pub fn flush(&mut self, table: &str, chain: &str) {
        if let Some(rules) = self.chains.get_mut(&key(table, chain)) {
            rules.clear();
        }
    }

    fn rules_mut(&mut self, table: &str, chain: &str) -> Option<&mut Vec<String>> {
        if BUILTIN_CHAINS.contains(&chain) {
            return Some(self.chains.entry(key(table, chain)).or_default());
        }
        self.chains.get_mut(&key(table, chain))
    }

    fn failure(command: &str, stderr: &str) -> Error {
        Error::Exit { command: command.to_owned(), code: 1, stderr: stderr.to_owned() }
    }

    fn parse(table: &str, document: &str) -> Result<Vec<(String, Option<String>)>> {
        let mut lines = document.lines().filter(|l| !l.is_empty() && !l.starts_with('#'));
        if lines.next() != Some(format!("*{table}").as_str()) {
            return Err(Self::failure("iptables-restore", "missing table header"));
        }
        let mut ops = Vec::new();
        for line in lines {
            if line == "COMMIT" {
                return Ok(ops);
            }
            if let Some(decl) = line.strip_prefix(':') {
                let chain = decl.split_whitespace().next().unwrap_or_default();
                ops.push((chain.to_owned(), None));
            } else if let Some(rule) = line.strip_prefix("-A ") {
                let (chain, spec) = rule.split_once(' ').unwrap_or((rule, ""));
                ops.push((chain.to_owned(), Some(spec.to_owned())));
            } else {
                return Err(Self::failure("iptables-restore", &format!("bad line: {line}")));
            }
        }
        Err(Self::failure("iptables-restore", "missing COMMIT"))
    }
}

fn key(table: &str, chain: &str) -> (String, String) {
    (table.to_owned(), chain.to_owned())
}

impl Backend for MemoryBackend {
    fn rule_exists(&self, table: &str, chain: &str, rule: &str) -> bool {
        self.chains
            .get(&key(table, chain))
            .is_some_and(|rules| rules.iter().any(|r| r == rule))
    }

    fn chain_exists(&self, table: &str, chain: &str) -> bool {
        BUILTIN_CHAINS.contains(&chain) || self.chains.contains_key(&key(table, chain))
    }

    fn new_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        if self.chain_exists(table, chain) {
            return Err(Self::failure("iptables -N", "Chain already exists."));
        }
        self.chains.insert(key(table, chain), Vec::new());
        Ok(())
    }

    fn insert_rule(&mut self, table: &str, chain: &str, rule: &str) -> Result<()> {
        if self.fail_inserts {
            return Err(Self::failure("iptables -I", "insert refused"));
        }
        let target = rule.strip_prefix("-j ").unwrap_or_default();
        if !target.is_empty() && !self.chain_exists(table, target) {
            return Err(Self::failure("iptables -I", "Couldn't load target"));
        }
        let rules = self
            .rules_mut(table, chain)
            .ok_or_else(|| Self::failure("iptables -I", "No chain/target/match by that name."))?;
        rules.insert(0, rule.to_owned());
        Ok(())
    }

    fn delete_rule(&mut self, table: &str, chain: &str, rule: &str) -> Result<()> {
        let rules = self
            .rules_mut(table, chain)
            .ok_or_else(|| Self::failure("iptables -D", "No chain/target/match by that name."))?;
        match rules.iter().position(|r| r == rule) {
            Some(pos) => {
                rules.remove(pos);
                Ok(())
            }
            None => Err(Self::failure("iptables -D", "Bad rule")),
        }
    }

    fn delete_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        self.chains
            .remove(&key(table, chain))
            .map(|_| ())
            .ok_or_else(|| Self::failure("iptables -X", "No chain/target/match by that name."))
    }

    fn restore(&mut self, table: &str, document: &str) -> Result<()> {
        self.restores.push(document.to_owned());
        if self.fail_restores {
            return Err(Self::failure("iptables-restore", "restore refused"));
        }
        // all or nothing, like the kernel commit
        let mut staged = self.chains.clone();
        for (chain, rule) in Self::parse(table, document)? {
            let k = key(table, &chain);
            match rule {
                None => {
                    staged.insert(k, Vec::new());
                }
                Some(rule) if BUILTIN_CHAINS.contains(&chain.as_str()) => {
                    staged.entry(k).or_default().push(rule)
                }
                Some(rule) => staged
                    .get_mut(&k)
                    .ok_or_else(|| Self::failure("iptables-restore", "unknown chain"))?
                    .push(rule),
            }
        }
        self.chains = staged;
        Ok(())
    }
}
