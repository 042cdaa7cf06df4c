use itertools::Itertools;
use sha256::digest;

use crate::{compile, logging::*, CoreNode, Result, Translate, Translator, CHAIN, NAT_TABLE};

/// Translation rule for one node. Recomputed on every reconcile.
#[derive(Debug, Clone)]
pub struct DnatRule<'a> {
    /// Only used for diagnostics.
    pub node: String,
    pub original_address: String,
    pub original_port: String,
    pub translator: Option<&'a Translator>,
}

impl<'a> DnatRule<'a> {
    /// The iptables-save line appending this rule to the managed chain.
    pub fn line(&self) -> Result<String> {
        let matcher = format!(
            "-A {CHAIN} -p tcp -d {addr} --dport {port}",
            addr = self.original_address,
            port = self.original_port,
        );
        match self.translator {
            None => Ok(matcher),
            Some(t) => {
                let to = t.translate(&self.original_address, &self.original_port)?;
                Ok(format!("{matcher} -j DNAT --to {to}"))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct RuleSet<'a> {
    rules: Vec<DnatRule<'a>>,
}

impl<'a> RuleSet<'a> {
    /// Compiles one rule per node. A node that cannot be compiled is logged
    /// and left out; it never prevents the others from being compiled.
    pub fn compile<'n, I>(nodes: I, translator: Option<&'a Translator>) -> Self
    where
        I: IntoIterator<Item = &'n CoreNode>,
    {
        let mut rules = Vec::new();
        for node in nodes {
            match compile(node, translator) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!("skipping node: {e}"),
            }
        }
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Renders the rules as sorted, de-duplicated lines and hashes them, so
    /// that the result depends only on rule content and not on node order.
    pub fn canonicalize(&self) -> Canonical {
        let lines = self
            .rules
            .iter()
            .filter_map(|rule| match rule.line() {
                Ok(line) => Some(line),
                Err(e) => {
                    warn!("skipping node {}: {e}", rule.node);
                    None
                }
            })
            .sorted()
            .dedup()
            .collect::<Vec<_>>();
        let hash = hash_lines(&lines);
        Canonical { lines, hash }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub lines: Vec<String>,
    pub hash: String,
}

impl Canonical {
    /// An iptables-restore document that resets the managed chain and fills
    /// it with exactly these lines in a single commit.
    pub fn restore_document(&self) -> String {
        let mut doc = format!("*{NAT_TABLE}\n:{CHAIN} - [0:0]\n");
        for line in &self.lines {
            doc.push_str(line);
            doc.push('\n');
        }
        doc.push_str("COMMIT\n");
        doc
    }
}

fn hash_lines(lines: &[String]) -> String {
    let mut buf = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }
    digest(buf)
}
