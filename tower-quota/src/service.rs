use std::task::Context;
use std::task::Poll;

use futures::FutureExt;
use futures::future::BoxFuture;
use quota_limit::CounterStore;
use tower::BoxError;
use tower::Service;

use crate::enforcer::Outcome;
use crate::enforcer::QuotaEnforcer;
use crate::enforcer::Submission;
use crate::error::QuotaError;

/// A [`Service`] that runs every [`Submission`] through a [`QuotaEnforcer`].
///
/// The service is always ready: waiting happens per task inside `call`, so a
/// busy task never holds back submissions for other tasks. Business outcomes
/// are responses; only store failures surface as errors, as a boxed
/// [`QuotaError::StoreUnavailable`].
#[derive(Debug)]
pub struct QuotaService<S>
where
    S: CounterStore + ?Sized,
{
    enforcer: QuotaEnforcer<S>,
}

impl<S> Clone for QuotaService<S>
where
    S: CounterStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            enforcer: self.enforcer.clone(),
        }
    }
}

impl<S> QuotaService<S>
where
    S: CounterStore + ?Sized,
{
    pub fn new(enforcer: QuotaEnforcer<S>) -> Self {
        Self { enforcer }
    }

    pub fn enforcer(&self) -> &QuotaEnforcer<S> {
        &self.enforcer
    }
}

impl<S> Service<Submission> for QuotaService<S>
where
    S: CounterStore + ?Sized + 'static,
{
    type Response = Outcome;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Outcome, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Submission) -> Self::Future {
        let enforcer = self.enforcer.clone();
        async move {
            enforcer
                .submit(req)
                .await
                .map_err(|err| BoxError::from(QuotaError::from(err)))
        }
        .boxed()
    }
}
