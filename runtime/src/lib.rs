//! # Campus Queue Runtime
//!
//! Effect execution and conflict retries for the campus queue engine.
//!
//! Reducers in this workspace are pure: they return [`Effect`] descriptions and
//! never perform I/O. Request handlers commit the state change a reducer produced
//! and only then hand the effects to this crate, which awaits them and returns the
//! actions they produced so the handler can feed them back into the reducer.
//!
//! ## Core Components
//!
//! - **Effect Executor**: [`execute`] / [`execute_all`] await an effect tree
//! - **Feedback loop**: [`drive`] runs effects and reduces their actions until quiescent
//! - **Retry**: [`retry::retry_with_backoff`] for optimistic-concurrency conflicts
//!
//! ## Example
//!
//! ```ignore
//! use campus_queue_runtime::drive;
//!
//! let effects = reducer.reduce(&mut state, LedgerAction::CompleteService { .. }, &env);
//! repository.commit(&state).await?;
//! let feedback = drive(&reducer, &mut state, &env, effects).await;
//! ```

use campus_queue_core::{effect::Effect, reducer::Reducer, SmallVec};
use futures::future::{join_all, BoxFuture, FutureExt};

/// Retry logic with exponential backoff
pub mod retry;

/// Maximum number of reduce/execute rounds [`drive`] performs before giving up.
pub const MAX_FEEDBACK_ROUNDS: usize = 16;

/// Executes an effect tree and collects the actions it produces.
///
/// - `Parallel` children run concurrently; their actions are returned in child order
/// - `Sequential` children run one after another
/// - `Delay` sleeps, then yields its action
/// - `Future` is awaited; `Some(action)` is collected
#[tracing::instrument(skip(effect), name = "execute_effect", level = "trace")]
pub fn execute<A>(effect: Effect<A>) -> BoxFuture<'static, Vec<A>>
where
    A: Send + 'static,
{
    async move {
        match effect {
            Effect::None => {
                metrics::counter!("runtime.effects.executed", "type" => "none").increment(1);
                Vec::new()
            },
            Effect::Future(fut) => {
                tracing::trace!("Executing Effect::Future");
                metrics::counter!("runtime.effects.executed", "type" => "future").increment(1);
                fut.await.into_iter().collect()
            },
            Effect::Delay { duration, action } => {
                tracing::trace!("Executing Effect::Delay (duration: {:?})", duration);
                metrics::counter!("runtime.effects.executed", "type" => "delay").increment(1);
                tokio::time::sleep(duration).await;
                vec![*action]
            },
            Effect::Parallel(effects) => {
                tracing::trace!("Executing Effect::Parallel with {} effects", effects.len());
                metrics::counter!("runtime.effects.executed", "type" => "parallel").increment(1);
                join_all(effects.into_iter().map(execute))
                    .await
                    .into_iter()
                    .flatten()
                    .collect()
            },
            Effect::Sequential(effects) => {
                tracing::trace!("Executing Effect::Sequential with {} effects", effects.len());
                metrics::counter!("runtime.effects.executed", "type" => "sequential").increment(1);
                let mut actions = Vec::new();
                for effect in effects {
                    actions.extend(execute(effect).await);
                }
                actions
            },
        }
    }
    .boxed()
}

/// Executes a reducer's effects in order and collects every produced action.
pub async fn execute_all<A, I>(effects: I) -> Vec<A>
where
    A: Send + 'static,
    I: IntoIterator<Item = Effect<A>>,
{
    let mut actions = Vec::new();
    for effect in effects {
        if effect.is_noop() {
            continue;
        }
        actions.extend(execute(effect).await);
    }
    actions
}

/// Runs effects and reduces the actions they produce until no effect is left.
///
/// Returns the number of feedback actions reduced. The loop stops after
/// [`MAX_FEEDBACK_ROUNDS`] rounds even if effects remain.
pub async fn drive<R>(
    reducer: &R,
    state: &mut R::State,
    env: &R::Environment,
    effects: SmallVec<[Effect<R::Action>; 4]>,
) -> usize
where
    R: Reducer,
    R::Action: Send + 'static,
{
    let mut pending: Vec<Effect<R::Action>> = effects.into_iter().collect();
    let mut reduced = 0;

    for _ in 0..MAX_FEEDBACK_ROUNDS {
        if pending.iter().all(Effect::is_noop) {
            return reduced;
        }

        let actions = execute_all(std::mem::take(&mut pending)).await;
        for action in actions {
            reduced += 1;
            pending.extend(reducer.reduce(state, action, env));
        }
    }

    if !pending.iter().all(Effect::is_noop) {
        tracing::warn!(
            rounds = MAX_FEEDBACK_ROUNDS,
            "Effect feedback loop did not settle, dropping remaining effects"
        );
    }
    reduced
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_queue_core::smallvec;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum CounterAction {
        Bump,
        Bumped(u32),
        Loop,
    }

    #[derive(Default)]
    struct CounterState {
        bumps: u32,
        seen: Vec<u32>,
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = CounterState;
        type Action = CounterAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut CounterState,
            action: CounterAction,
            _env: &(),
        ) -> SmallVec<[Effect<CounterAction>; 4]> {
            match action {
                CounterAction::Bump => {
                    state.bumps += 1;
                    let bumps = state.bumps;
                    smallvec![campus_queue_core::async_effect! {
                        Some(CounterAction::Bumped(bumps))
                    }]
                },
                CounterAction::Bumped(n) => {
                    state.seen.push(n);
                    smallvec![Effect::None]
                },
                CounterAction::Loop => smallvec![Effect::Delay {
                    duration: Duration::ZERO,
                    action: Box::new(CounterAction::Loop),
                }],
            }
        }
    }

    #[test]
    fn ready_future_runs_without_a_runtime() {
        let actions = tokio_test::block_on(execute(campus_queue_core::async_effect! { Some(7_u8) }));
        assert_eq!(actions, vec![7]);
    }

    #[tokio::test]
    async fn parallel_actions_keep_child_order() {
        let effect = Effect::Parallel(vec![
            Effect::Delay {
                duration: Duration::from_millis(5),
                action: Box::new(1),
            },
            campus_queue_core::async_effect! { Some(2) },
            Effect::None,
            campus_queue_core::async_effect! { None },
        ]);

        assert_eq!(execute(effect).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn sequential_actions_run_in_order() {
        let effect = Effect::chain(vec![
            campus_queue_core::async_effect! { Some("first") },
            campus_queue_core::async_effect! { Some("second") },
        ]);

        assert_eq!(execute(effect).await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn drive_feeds_actions_back() {
        let reducer = CounterReducer;
        let mut state = CounterState::default();

        let effects = reducer.reduce(&mut state, CounterAction::Bump, &());
        let reduced = drive(&reducer, &mut state, &(), effects).await;

        assert_eq!(reduced, 1);
        assert_eq!(state.seen, vec![1]);
    }

    #[tokio::test]
    async fn drive_stops_after_max_rounds() {
        let reducer = CounterReducer;
        let mut state = CounterState::default();

        let effects = reducer.reduce(&mut state, CounterAction::Loop, &());
        let reduced = drive(&reducer, &mut state, &(), effects).await;

        assert_eq!(reduced, MAX_FEEDBACK_ROUNDS);
    }
}
