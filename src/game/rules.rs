//! Move Validation
//!
//! The authoritative transition function for misère Nim.
//! Pure: no I/O, no clocks, no shared state. The caller stores the result.

use thiserror::Error;

use crate::game::state::{GameState, GameStatus, LastMove, PlayerId};

/// Reasons a move (or forced finish) is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveError {
    /// Game already over.
    #[error("session already finished")]
    SessionFinished,
    /// Acting player does not hold the turn.
    #[error("not your turn")]
    NotYourTurn,
    /// Pile index out of range.
    #[error("invalid pile")]
    InvalidPile,
    /// Zero stones, or more than the pile holds.
    #[error("invalid stone count")]
    InvalidStoneCount,
    /// Named player is not part of this game.
    #[error("player is not part of this session")]
    NotAPlayer,
}

/// Validate and apply one move, returning the next state.
///
/// Checks run in a fixed order and the first failure wins:
/// finished, turn ownership, pile range, stone count.
/// Whoever empties the last pile loses.
pub fn apply_move(
    state: &GameState,
    player: &PlayerId,
    pile: usize,
    stones: u32,
) -> Result<GameState, MoveError> {
    if state.status != GameStatus::Active {
        return Err(MoveError::SessionFinished);
    }
    if *player != state.current_player {
        return Err(MoveError::NotYourTurn);
    }
    let available = *state.piles.get(pile).ok_or(MoveError::InvalidPile)?;
    if stones == 0 || stones > available {
        return Err(MoveError::InvalidStoneCount);
    }
    // current_player is always a participant, so this cannot miss
    let opponent = state.opponent(player).cloned().ok_or(MoveError::NotAPlayer)?;

    let mut next = state.clone();
    next.piles[pile] = available - stones;
    next.last_move = Some(LastMove {
        player: player.clone(),
        pile,
        stones,
    });
    next.total_moves += 1;

    if next.all_piles_empty() {
        next.status = GameStatus::Finished;
        next.winner = Some(opponent);
    } else {
        next.current_player = opponent;
    }

    Ok(next)
}

/// Terminate a game externally with a declared winner.
pub fn force_finish(state: &GameState, winner: &PlayerId) -> Result<GameState, MoveError> {
    if state.status != GameStatus::Active {
        return Err(MoveError::SessionFinished);
    }
    if !state.is_player(winner) {
        return Err(MoveError::NotAPlayer);
    }

    let mut next = state.clone();
    next.status = GameStatus::Finished;
    next.winner = Some(winner.clone());
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn players() -> (PlayerId, PlayerId) {
        (PlayerId::new("player1"), PlayerId::new("player2"))
    }

    fn game(piles: Vec<u32>) -> GameState {
        let (p1, p2) = players();
        GameState::new(piles, p1, p2)
    }

    #[test]
    fn test_first_move_three_piles() {
        let (p1, p2) = players();
        let state = game(vec![3, 5, 7]);

        let next = apply_move(&state, &p1, 0, 3).unwrap();
        assert_eq!(next.piles, vec![0, 5, 7]);
        assert_eq!(next.current_player, p2);
        assert_eq!(next.status, GameStatus::Active);
        assert_eq!(next.total_moves, 1);
        assert_eq!(next.last_move, Some(LastMove { player: p1, pile: 0, stones: 3 }));
    }

    #[test]
    fn test_taking_last_stone_loses() {
        let (p1, p2) = players();
        let state = game(vec![1]);

        let next = apply_move(&state, &p1, 0, 1).unwrap();
        assert_eq!(next.piles, vec![0]);
        assert_eq!(next.status, GameStatus::Finished);
        assert_eq!(next.winner, Some(p2));
    }

    #[test]
    fn test_too_many_stones_rejected() {
        let (_, p2) = players();
        let mut state = game(vec![1]);
        state.current_player = p2.clone();

        let result = apply_move(&state, &p2, 0, 2);
        assert_eq!(result, Err(MoveError::InvalidStoneCount));
        assert_eq!(state.piles, vec![1]);
    }

    #[test]
    fn test_zero_stones_rejected() {
        let (p1, _) = players();
        let state = game(vec![3, 5, 7]);
        assert_eq!(apply_move(&state, &p1, 1, 0), Err(MoveError::InvalidStoneCount));
    }

    #[test]
    fn test_bad_pile_rejected() {
        let (p1, _) = players();
        let state = game(vec![3, 5, 7]);
        assert_eq!(apply_move(&state, &p1, 3, 1), Err(MoveError::InvalidPile));
    }

    #[test]
    fn test_precondition_order() {
        let (p1, p2) = players();
        let mut state = game(vec![1]);
        state.status = GameStatus::Finished;
        state.winner = Some(p1.clone());
        // Finished beats every other failure
        assert_eq!(apply_move(&state, &p2, 9, 0), Err(MoveError::SessionFinished));

        let state = game(vec![1]);
        // Turn check beats pile and count
        assert_eq!(apply_move(&state, &p2, 9, 0), Err(MoveError::NotYourTurn));
        // Pile beats count
        assert_eq!(apply_move(&state, &p1, 9, 0), Err(MoveError::InvalidPile));
    }

    #[test]
    fn test_stranger_is_not_current_player() {
        let state = game(vec![3, 5, 7]);
        let stranger = PlayerId::new("mallory");
        assert_eq!(apply_move(&state, &stranger, 0, 1), Err(MoveError::NotYourTurn));
    }

    #[test]
    fn test_turn_matching_is_case_insensitive() {
        let state = game(vec![3, 5, 7]);
        let shouted = PlayerId::new("PLAYER1");
        assert!(apply_move(&state, &shouted, 2, 7).is_ok());
    }

    #[test]
    fn test_force_finish() {
        let (p1, p2) = players();
        let state = game(vec![3, 5, 7]);

        let finished = force_finish(&state, &p2).unwrap();
        assert_eq!(finished.status, GameStatus::Finished);
        assert_eq!(finished.winner, Some(p2.clone()));
        assert_eq!(finished.piles, state.piles);

        assert_eq!(force_finish(&finished, &p1), Err(MoveError::SessionFinished));
        assert_eq!(
            force_finish(&state, &PlayerId::new("mallory")),
            Err(MoveError::NotAPlayer)
        );
    }

    #[test]
    fn test_random_playouts_terminate_with_loser_taking_last() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let piles: Vec<u32> = (0..rng.gen_range(1..5)).map(|_| rng.gen_range(1..10)).collect();
            let mut state = game(piles);

            while state.is_active() {
                let non_empty: Vec<usize> = state.piles.iter()
                    .enumerate()
                    .filter(|&(_, &p)| p > 0)
                    .map(|(i, _)| i)
                    .collect();
                let pile = non_empty[rng.gen_range(0..non_empty.len())];
                let stones = rng.gen_range(1..=state.piles[pile]);
                let mover = state.current_player.clone();

                state = apply_move(&state, &mover, pile, stones).unwrap();

                if !state.is_active() {
                    assert!(state.all_piles_empty());
                    assert_eq!(state.winner.as_ref(), state.opponent(&mover));
                }
            }
        }
    }

    proptest! {
        #[test]
        fn prop_pile_sum_strictly_decreases(
            piles in proptest::collection::vec(1u32..12, 1..5),
            picks in proptest::collection::vec((0usize..8, 1u32..12), 0..40),
        ) {
            let mut state = game(piles);
            for (pile, stones) in picks {
                let before = state.total_stones();
                let mover = state.current_player.clone();
                if let Ok(next) = apply_move(&state, &mover, pile, stones) {
                    prop_assert!(next.total_stones() < before);
                    for (old, new) in state.piles.iter().zip(next.piles.iter()) {
                        prop_assert!(new <= old);
                    }
                    prop_assert_eq!(next.winner.is_some(), next.status == GameStatus::Finished);
                    prop_assert_eq!(next.status == GameStatus::Finished, next.all_piles_empty());
                    if next.is_active() {
                        prop_assert_ne!(&next.current_player, &mover);
                    }
                    state = next;
                }
            }
        }

        #[test]
        fn prop_wrong_player_leaves_state_untouched(
            piles in proptest::collection::vec(1u32..12, 1..5),
            pile in 0usize..8,
            stones in 0u32..12,
        ) {
            let (_, p2) = players();
            let state = game(piles);
            let snapshot = state.clone();
            prop_assert_eq!(apply_move(&state, &p2, pile, stones), Err(MoveError::NotYourTurn));
            prop_assert_eq!(state, snapshot);
        }
    }
}
