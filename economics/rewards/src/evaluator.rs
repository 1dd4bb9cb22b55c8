use crate::config::WeightScheme;
use crate::params::ChainParams;
use crate::types::*;

/// Eligibility rules applied at round end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationPolicy {
    pub min_balance: Amount,
    pub weight_scheme: WeightScheme,
}

/// Output of [`evaluate_round`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundEvaluation {
    /// The evaluated round, marked finished with its totals filled in.
    pub finished: Round,
    /// The round that follows, pending.
    pub next: Round,
    /// Payout records of eligible entries, ordered by address.
    pub snapshots: Vec<RewardSnapshot>,
}

/// Weight of `entry` in `round`, or `None` if it is not eligible.
pub fn entry_weight(entry: &RewardEntry, round: &Round, policy: &EvaluationPolicy) -> Option<Amount> {
    if entry.is_disqualified_in(round.number) || entry.balance < policy.min_balance {
        return None;
    }
    let weight = match policy.weight_scheme {
        WeightScheme::Flat => entry.balance,
        // Balance-blocks normalised by round length, so an address that held
        // its balance all round weighs exactly its balance.
        WeightScheme::TimeWeighted => (entry.held_weight(round) / round.length() as u128) as Amount,
    };
    (weight > 0).then_some(weight)
}

/// Compute payouts for `current` over the entry set as of its last block.
///
/// Payout per entry is `total_reward * weight / total_weight`, truncated. The
/// truncation remainder stays unallocated: `finished.paid` may fall short of
/// `total_reward` by less than the number of eligible entries.
pub fn evaluate_round(
    current: &Round,
    entries: &[RewardEntry],
    policy: &EvaluationPolicy,
    params: &ChainParams,
    next_start_time: i64,
) -> LedgerResult<RoundEvaluation> {
    let mut eligible: Vec<(&RewardEntry, Amount)> = entries
        .iter()
        .filter_map(|e| entry_weight(e, current, policy).map(|w| (e, w)))
        .collect();
    eligible.sort_by(|a, b| a.0.address.cmp(&b.0.address));

    let total_weight: u128 = eligible.iter().map(|(_, w)| *w as u128).sum();

    let mut snapshots = Vec::with_capacity(eligible.len());
    let mut paid: Amount = 0;
    for (entry, weight) in &eligible {
        let payout = current.total_reward as u128 * *weight as u128 / total_weight;
        let payout = Amount::try_from(payout)
            .map_err(|_| LedgerError::Evaluation(format!("payout overflow for {}", entry.address)))?;
        paid = paid.checked_add(payout).ok_or(LedgerError::Overflow)?;
        snapshots.push(RewardSnapshot {
            round: current.number,
            address: entry.address.clone(),
            balance: entry.balance,
            weight: *weight,
            payout,
        });
    }

    if paid > current.total_reward {
        return Err(LedgerError::Evaluation(format!(
            "round {} pays {paid}, exceeding total reward {}",
            current.number, current.total_reward
        )));
    }
    let remainder = current.total_reward - paid;
    if !eligible.is_empty() && remainder >= eligible.len() as u64 {
        return Err(LedgerError::Evaluation(format!(
            "round {} leaves remainder {remainder} for {} eligible entries",
            current.number,
            eligible.len()
        )));
    }

    let mut finished = current.clone();
    finished.status = RoundStatus::Finished;
    finished.eligible_entries = eligible.len() as u64;
    finished.eligible_weight = total_weight;
    finished.paid = paid;

    let next = params.next_round(&finished, next_start_time)?;

    Ok(RoundEvaluation {
        finished,
        next,
        snapshots,
    })
}
