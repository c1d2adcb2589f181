//! Functions over the request's authenticated identity.

use super::{expect_args, Function, FunctionError, ResolutionCause};
use crate::context::EvaluationContext;
use async_trait::async_trait;

/// `username`: name of the authenticated principal.
pub struct UsernameFunction;

impl UsernameFunction {
    pub const NAME: &'static str = "username";
}

#[async_trait]
impl Function for UsernameFunction {
    async fn resolve(
        &self,
        ctx: &EvaluationContext,
        args: &[String],
    ) -> Result<String, FunctionError> {
        expect_args(Self::NAME, args, 0)?;
        ctx.principal()
            .map(|p| p.name().to_string())
            .ok_or_else(|| {
                FunctionError::resolution(
                    Self::NAME,
                    ResolutionCause::Failed("request has no authenticated principal".to_string()),
                )
            })
    }
}
