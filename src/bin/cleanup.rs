use clap::{crate_description, Parser};
use kubeletdnat::*;

#[derive(Parser, Debug)]
#[clap(about = crate_description!())]
pub struct Opts {
    #[clap(flatten)]
    pub executor: Executor,
}

fn main() -> anyhow::Result<()> {
    initialize_logging("KUBELETDNAT_LOG_LEVEL");

    let opts = Opts::parse();
    let mut operator = Operator::new(IptablesBackend::new(opts.executor), None);

    warn!("deleting jump rule and chain {CHAIN} from table {NAT_TABLE}");
    operator.cleanup()?;
    Ok(())
}
