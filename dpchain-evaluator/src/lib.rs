//! Transaction evaluator (§4.D): evaluates a `signed_transaction` against a
//! pending state, producing an evaluation record (fees collected per asset,
//! required signatures) or one of the errors named in §4.D's failure list.

mod operations;

use dpchain_core::{
    ChainError, ChainResult, EvaluationRecord, SignedTransaction, BASE_ASSET_ID,
};
use dpchain_crypto::CryptoProvider;
use dpchain_state::ChainStore;
use std::sync::Arc;

pub struct TransactionEvaluator {
    crypto: Arc<dyn CryptoProvider>,
    chain_id: [u8; 32],
    required_fee: u64,
    /// Honoured only during replay of already-committed blocks (§4.D
    /// "Signatures").
    skip_signature_verification: bool,
}

impl TransactionEvaluator {
    pub fn new(crypto: Arc<dyn CryptoProvider>, chain_id: [u8; 32], required_fee: u64) -> Self {
        TransactionEvaluator {
            crypto,
            chain_id,
            required_fee,
            skip_signature_verification: false,
        }
    }

    pub fn with_skip_signature_verification(mut self, skip: bool) -> Self {
        self.skip_signature_verification = skip;
        self
    }

    pub fn evaluate(
        &self,
        txn: &SignedTransaction,
        state: &mut dyn ChainStore,
    ) -> ChainResult<EvaluationRecord> {
        let txid = txn.id();
        let now = state.now();

        if txn.transaction.expiration <= now {
            return Err(ChainError::ExpiredTransaction);
        }
        if state.get_evaluation_record(txid).is_some() {
            return Err(ChainError::DuplicateTransaction);
        }

        let mut record = EvaluationRecord::default();
        let mut base_withdrawn: u64 = 0;
        let mut base_deposited: u64 = 0;

        for op in &txn.transaction.operations {
            operations::evaluate_operation(
                self.crypto.as_ref(),
                op,
                state,
                now,
                &mut record,
                &mut base_withdrawn,
                &mut base_deposited,
            )?;
        }

        if !self.skip_signature_verification {
            self.verify_signatures(txn, &record)?;
        }

        let fee = base_withdrawn
            .checked_sub(base_deposited)
            .ok_or(ChainError::SubtractionOverflow)?;
        if fee < self.required_fee {
            return Err(ChainError::InsufficientFee {
                required: self.required_fee,
                got: fee,
            });
        }
        *record.fees_collected.entry(BASE_ASSET_ID).or_insert(0) += fee;

        state.store_evaluation_record(txid, Some(record.clone()));
        tracing::debug!(?txid, fee, "transaction evaluated");
        Ok(record)
    }

    fn verify_signatures(
        &self,
        txn: &SignedTransaction,
        record: &EvaluationRecord,
    ) -> ChainResult<()> {
        let digest = txn.digest(&self.chain_id);
        for required in &record.required_signatures {
            let matched = txn.signatures.iter().find(|sig| {
                self.crypto
                    .address_from_public_key(&sig.public_key)
                    .map(|addr| &addr == required)
                    .unwrap_or(false)
            });
            let sig = matched.ok_or(ChainError::MissingSignature)?;
            let ok = self
                .crypto
                .verify_signature(&sig.public_key, &digest, &sig.signature)
                .map_err(|_| ChainError::InvalidSignature)?;
            if !ok {
                return Err(ChainError::InvalidSignature);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpchain_core::{Operation, Transaction, TxSignature, WithdrawCondition, ZERO_SLATE_ID};
    use dpchain_crypto::{generate_keypair, DefaultCryptoProvider};
    use dpchain_state::MemoryChainStore;

    fn sign(txn: &Transaction, chain_id: &[u8; 32], sk: &[u8], pk: &[u8]) -> SignedTransaction {
        let crypto = DefaultCryptoProvider::new();
        let signed = SignedTransaction {
            transaction: txn.clone(),
            signatures: vec![],
        };
        let digest = signed.digest(chain_id);
        let signature = crypto.sign_message(sk, &digest).unwrap();
        SignedTransaction {
            transaction: txn.clone(),
            signatures: vec![TxSignature {
                public_key: pk.to_vec(),
                signature,
            }],
        }
    }

    #[test]
    fn withdraw_requires_signature_and_moves_funds() {
        let mut store = MemoryChainStore::new();
        store.set_now(100);
        let (pk, sk) = generate_keypair();
        let crypto = DefaultCryptoProvider::new();
        let owner = crypto.address_from_public_key(&pk).unwrap();

        let condition = WithdrawCondition {
            owner,
            asset_id: BASE_ASSET_ID,
        };
        let balance = dpchain_core::Balance {
            condition: condition.clone(),
            amount: 1_000,
            slate_id: ZERO_SLATE_ID,
            created_at: 0,
            last_update: 0,
        };
        store.store_balance(condition.id(), Some(balance));

        let chain_id = [9u8; 32];
        let evaluator = TransactionEvaluator::new(Arc::new(crypto), chain_id, 5);

        let txn = Transaction {
            operations: vec![Operation::Withdraw {
                owner,
                asset_id: BASE_ASSET_ID,
                amount: 100,
            }],
            expiration: 200,
        };
        let signed = sign(&txn, &chain_id, &sk, &pk);

        let record = evaluator.evaluate(&signed, &mut store).unwrap();
        assert_eq!(*record.fees_collected.get(&BASE_ASSET_ID).unwrap(), 100);
        assert_eq!(store.get_balance(condition.id()).unwrap().amount, 900);
    }

    #[test]
    fn duplicate_transaction_rejected() {
        let mut store = MemoryChainStore::new();
        store.set_now(100);
        let (pk, sk) = generate_keypair();
        let chain_id = [1u8; 32];
        let evaluator =
            TransactionEvaluator::new(Arc::new(DefaultCryptoProvider::new()), chain_id, 0);
        let txn = Transaction {
            operations: vec![],
            expiration: 200,
        };
        let signed = sign(&txn, &chain_id, &sk, &pk);
        evaluator.evaluate(&signed, &mut store).unwrap();
        let err = evaluator.evaluate(&signed, &mut store).unwrap_err();
        assert_eq!(err, ChainError::DuplicateTransaction);
    }

    #[test]
    fn expired_transaction_rejected() {
        let mut store = MemoryChainStore::new();
        store.set_now(1_000);
        let (pk, sk) = generate_keypair();
        let chain_id = [2u8; 32];
        let evaluator =
            TransactionEvaluator::new(Arc::new(DefaultCryptoProvider::new()), chain_id, 0);
        let txn = Transaction {
            operations: vec![],
            expiration: 500,
        };
        let signed = sign(&txn, &chain_id, &sk, &pk);
        let err = evaluator.evaluate(&signed, &mut store).unwrap_err();
        assert_eq!(err, ChainError::ExpiredTransaction);
    }
}
