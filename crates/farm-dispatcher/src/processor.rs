//! Operator Instruction Processor
//!
//! Decodes an [`OperatorCall`], checks its sequence against the caller's
//! last accepted one and routes the instruction to the dispatcher. The
//! sequence is recorded only when the instruction succeeds.

use borsh::BorshDeserialize;
use relay_types::Address;

use crate::{
    error::{DispatchError, DispatchResult},
    host::Host,
    instruction::{OperatorCall, OperatorInstruction},
    Dispatcher,
};

/// Process instruction
pub fn process<H: Host>(
    dispatcher: &mut Dispatcher,
    host: &mut H,
    caller: &Address,
    instruction_data: &[u8],
) -> DispatchResult<()> {
    let call = OperatorCall::try_from_slice(instruction_data)
        .map_err(|_| DispatchError::InvalidInstructionData)?;
    dispatcher.check_sequence(caller, call.sequence)?;

    tracing::debug!(
        "Operator instruction from {} (sequence {}): {:?}",
        caller,
        call.sequence,
        call.instruction
    );

    route(dispatcher, host, caller, call.instruction)?;
    dispatcher.record_sequence(caller, call.sequence)
}

fn route<H: Host>(
    dispatcher: &mut Dispatcher,
    host: &mut H,
    caller: &Address,
    instruction: OperatorInstruction,
) -> DispatchResult<()> {
    match instruction {
        OperatorInstruction::FallbackDeposit { user, pool, nonce } => {
            dispatcher.fallback_deposit(host, caller, &user, pool, nonce)
        }

        OperatorInstruction::FallbackWithdraw {
            user,
            pool,
            amount,
            nonce,
        } => dispatcher.fallback_withdraw(host, caller, &user, pool, amount, nonce),

        OperatorInstruction::Harvest { user, pool } => {
            dispatcher.harvest(host, &user, pool).map(|_| ())
        }

        OperatorInstruction::SetOperator { operator } => {
            dispatcher.set_operator(host, caller, operator)
        }

        OperatorInstruction::TransferOwnership { owner } => {
            dispatcher.transfer_ownership(host, caller, owner)
        }

        OperatorInstruction::SetIncentiveAmount { amount } => {
            dispatcher.set_incentive_amount(host, caller, amount)
        }

        OperatorInstruction::WithdrawReserve { to, amount } => {
            dispatcher.withdraw_reserve(host, caller, &to, amount)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use relay_types::{InboundMessage, Operation, Payload};

    #[test]
    fn test_rejects_malformed_instruction() {
        let mut d = dispatcher();
        let mut host = MockHost::new();
        assert_eq!(
            process(&mut d, &mut host, &operator(), &[0xff, 1, 2]),
            Err(DispatchError::InvalidInstructionData)
        );
    }

    #[test]
    fn test_routes_fallback_deposit() {
        let mut d = dispatcher();
        let mut host = MockHost::new();
        let deposit = InboundMessage::new(
            SOURCE_CHAIN,
            source_sender(),
            &Payload {
                operation: Operation::Deposit,
                user: user(),
                pool: POOL,
                amount: 10,
                nonce: 1,
            },
        );
        d.receive(&mut host, &deposit).unwrap();

        let ix = OperatorInstruction::FallbackDeposit {
            user: user(),
            pool: POOL,
            nonce: 2,
        };
        process(&mut d, &mut host, &operator(), &OperatorCall::new(1, ix.clone()).to_bytes())
            .unwrap();
        assert!(d.delegate_of(&user()).unwrap().is_consumed(POOL, 2).unwrap());

        assert_eq!(
            process(&mut d, &mut host, &user(), &OperatorCall::new(1, ix).to_bytes()),
            Err(DispatchError::Unauthorized(user()))
        );
        assert_eq!(d.last_sequence(&user()), 0);
    }

    #[test]
    fn test_harvest_open_to_anyone() {
        let mut d = dispatcher();
        let mut host = MockHost::new();
        let ix = OperatorInstruction::Harvest {
            user: user(),
            pool: POOL,
        };
        let call = OperatorCall::new(1, ix).to_bytes();
        assert_eq!(
            process(&mut d, &mut host, &Address::from_label("anyone"), &call),
            Err(DispatchError::DelegateNotFound(user()))
        );
    }

    #[test]
    fn test_replayed_call_is_rejected() {
        let mut d = dispatcher();
        let mut host = MockHost::new();
        let first = Address::from_label("operator-a");
        let second = Address::from_label("operator-b");
        let rotate_to_first =
            OperatorCall::new(1, OperatorInstruction::SetOperator { operator: first }).to_bytes();
        let rotate_to_second =
            OperatorCall::new(2, OperatorInstruction::SetOperator { operator: second }).to_bytes();

        process(&mut d, &mut host, &owner(), &rotate_to_first).unwrap();
        process(&mut d, &mut host, &owner(), &rotate_to_second).unwrap();

        assert_eq!(
            process(&mut d, &mut host, &owner(), &rotate_to_first),
            Err(DispatchError::StaleSequence {
                signer: owner(),
                sequence: 1,
                last: 2
            })
        );
        assert_eq!(d.config().operator, second);
        assert_eq!(d.last_sequence(&owner()), 2);
    }

    #[test]
    fn test_failed_call_does_not_consume_sequence() {
        let mut d = dispatcher();
        let mut host = MockHost::new().with_reserve(10);
        let drain = |amount| {
            OperatorCall::new(
                5,
                OperatorInstruction::WithdrawReserve {
                    to: owner(),
                    amount,
                },
            )
            .to_bytes()
        };

        assert!(matches!(
            process(&mut d, &mut host, &owner(), &drain(11)),
            Err(DispatchError::InsufficientReserve { .. })
        ));
        assert_eq!(d.last_sequence(&owner()), 0);

        process(&mut d, &mut host, &owner(), &drain(10)).unwrap();
        assert_eq!(
            process(&mut d, &mut host, &owner(), &drain(10)),
            Err(DispatchError::StaleSequence {
                signer: owner(),
                sequence: 5,
                last: 5
            })
        );
    }
}
