//! `rebase` command: move a PR branch onto the latest base tip.

use tracing::{error, info, instrument};

use crate::context::BotContext;
use crate::errors::{CommandError, GitError};
use crate::git::PushMode;
use crate::report;

pub struct RebaseHandler<'a> {
    ctx: &'a BotContext<'a>,
}

impl<'a> RebaseHandler<'a> {
    pub fn new(ctx: &'a BotContext<'a>) -> Self {
        Self { ctx }
    }

    /// Rebase PR `number` onto `<target_remote>/<base>`. A conflicting rebase
    /// is aborted and reported with manual instructions; nothing is pushed.
    #[instrument(skip(self))]
    pub async fn rebase(&self, number: u64) -> Result<(), CommandError> {
        let pr = self.ctx.host.get_pull_request(number).await?;
        let upstream = self.ctx.registry.for_pull_request(
            &pr.head_ref,
            &pr.body,
            self.ctx.pr_branch_prefix(),
        );
        info!(number, branch = %pr.head_ref, prefix = %upstream.prefix, "rebasing PR");

        let remote = self.ctx.target_remote();
        let base = self.ctx.base_branch();
        let onto = format!("{remote}/{base}");
        self.ctx.git.fetch(remote, Some(base)).await?;
        self.ctx.git.fetch(remote, Some(&pr.head_ref)).await?;
        self.ctx
            .git
            .checkout_fresh(&pr.head_ref, &format!("{remote}/{}", pr.head_ref))
            .await?;

        let result = self.ctx.git.rebase(&pr.head_ref, &onto).await;
        let back = self.ctx.git.checkout(base).await;
        match result {
            Ok(()) => {}
            Err(GitError::RebaseConflict { branch, onto }) => {
                error!(branch = %branch, onto = %onto, "rebase hit conflicts");
                return Err(CommandError::RebaseConflict { branch, onto });
            }
            Err(e) => return Err(e.into()),
        }
        back?;

        self.ctx.push(&pr.head_ref, PushMode::ForceWithLease).await?;
        self.ctx
            .host
            .comment(number, &report::rebase_success_comment(&pr.head_ref, base))
            .await?;
        info!(number, branch = %pr.head_ref, "rebase complete");
        Ok(())
    }
}
