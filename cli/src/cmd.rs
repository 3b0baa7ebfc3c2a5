pub mod grade;
pub mod langs;

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct GlobalArgs {
    #[command(subcommand)]
    pub subcmd: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    #[command(alias("g"))]
    Grade(grade::Args),

    #[command(alias("l"))]
    Langs(langs::Args),
}

pub type SubcmdResult = anyhow::Result<()>;

impl GlobalArgs {
    pub async fn exec_subcmd(&self) -> SubcmdResult {
        use Subcommand::*;
        match &self.subcmd {
            Grade(args) => grade::exec(args, self).await,
            Langs(args) => langs::exec(args, self).await,
        }
    }
}
