use alloy_primitives::{Address, B256, Bytes, U256};
use serde::Deserialize;

use super::Submitter;
use crate::{
    error::{DaemonError, SubmitError, ValidationError},
    gateway::Daemon,
    ledger::{Ledger, OrderState},
    types::{CallData, Order, OrderHash, SignedOrder, TxArgs, parse_u256},
};

fn require_positive(amount: U256, field: &'static str) -> Result<(), ValidationError> {
    if amount.is_zero() {
        return Err(ValidationError::NonPositiveAmount(field));
    }
    Ok(())
}

/// Contract calls whose result is a bare number, e.g. `0x1f4`.
fn parse_number(result: &Bytes) -> Result<U256, DaemonError> {
    let text = std::str::from_utf8(result)
        .map_err(|_| DaemonError::Decode(format!("non-utf8 call result {result}")))?;
    parse_u256(text.trim().trim_matches('"'))
        .ok_or_else(|| DaemonError::Decode(format!("invalid number {text:?}")))
}

#[derive(Deserialize)]
struct Ret {
    ret: String,
}

/// Contract calls whose result is wrapped as `{"ret": ...}`.
fn parse_ret(result: &Bytes) -> Result<String, DaemonError> {
    Ok(serde_json::from_slice::<Ret>(result)?.ret)
}

impl<C: Daemon, W: Daemon, L: Ledger> Submitter<C, W, L> {
    fn contract_tx(&self, from: Address, call: &CallData) -> TxArgs {
        TxArgs::new(from, self.chain.contract()).with_call(call)
    }

    async fn call_contract(&self, from: Address, call: &CallData) -> Result<Bytes, SubmitError> {
        tracing::debug!(method = call.method(), %from, "contract call");
        Ok(self.chain_api.call(&self.contract_tx(from, call)).await?)
    }

    /// Moves `amount` of `token` from `from` into the contract. The zero
    /// address stands for the native coin.
    pub async fn deposit(
        &self,
        from: Address,
        token: Address,
        amount: U256,
    ) -> Result<B256, SubmitError> {
        require_positive(amount, "amount")?;
        let tx = self
            .contract_tx(from, &CallData::new("deposit"))
            .with_token(token, amount);
        self.post_tx(tx).await
    }

    pub async fn withdraw(
        &self,
        from: Address,
        token: Address,
        amount: U256,
    ) -> Result<B256, SubmitError> {
        require_positive(amount, "amount")?;
        let call = CallData::new("withdraw")
            .arg(&token)
            .and_then(|call| call.arg(&amount))
            .map_err(DaemonError::from)?;
        self.post_tx(self.contract_tx(from, &call)).await
    }

    /// Signs `order` with the maker's key without submitting it.
    pub async fn sign_order(&self, order: &Order) -> Result<(SignedOrder, OrderHash), SubmitError> {
        order.validate()?;
        let hash = order.hash();
        let signature = self
            .wallet
            .sign_hash(order.maker, hash)
            .await
            .inspect_err(|err| tracing::debug!(?err, %hash, "order signing failed"))?;
        Ok((SignedOrder::from_signature(*order, &signature)?, hash))
    }

    /// Signs `order` with the maker's key and posts it.
    pub async fn post_order(&self, order: &Order) -> Result<(B256, OrderHash), SubmitError> {
        let (signed, _) = self.sign_order(order).await?;
        self.post_signed_order(&signed).await
    }

    /// Posts an order signed elsewhere, from its maker.
    ///
    /// Once broadcast, the order is recorded as [`OrderState::Sending`] until
    /// its `Order` event is mirrored.
    pub async fn post_signed_order(
        &self,
        signed: &SignedOrder,
    ) -> Result<(B256, OrderHash), SubmitError> {
        signed.order.validate()?;
        let call = CallData::new("postOrder")
            .arg(signed)
            .map_err(DaemonError::from)?;
        let tx_hash = self
            .post_tx(self.contract_tx(signed.order.maker, &call))
            .await?;

        let hash = signed.hash();
        match self.ledger.create_order(signed, OrderState::Sending).await {
            Ok(true) => tracing::debug!(%hash, "order recorded as sending"),
            Ok(false) => tracing::debug!(%hash, "order already recorded"),
            Err(err) => tracing::warn!(?err, %hash, "failed to record posted order"),
        }
        Ok((tx_hash, hash))
    }

    /// Fills `amount` of `signed` on behalf of `taker`.
    pub async fn trade(
        &self,
        taker: Address,
        signed: &SignedOrder,
        amount: U256,
    ) -> Result<(B256, OrderHash), SubmitError> {
        require_positive(amount, "amount")?;
        signed.order.validate()?;
        let call = CallData::new("trade")
            .arg(signed)
            .and_then(|call| call.arg(&amount))
            .map_err(DaemonError::from)?;
        let tx_hash = self.post_tx(self.contract_tx(taker, &call)).await?;
        Ok((tx_hash, signed.hash()))
    }

    /// [`Submitter::trade`] against an order known to the ledger.
    pub async fn take_order_by_hash(
        &self,
        taker: Address,
        hash: OrderHash,
        amount: U256,
    ) -> Result<(B256, OrderHash), SubmitError> {
        require_positive(amount, "amount")?;
        let record = self
            .ledger
            .read_order(hash)
            .await?
            .ok_or(ValidationError::MissingOrder)?;
        self.trade(taker, &record.signed, amount).await
    }

    /// Cancels `signed`, from its maker.
    pub async fn cancel_order(&self, signed: &SignedOrder) -> Result<B256, SubmitError> {
        signed.order.validate()?;
        let call = CallData::new("cancelOrder")
            .arg(signed)
            .map_err(DaemonError::from)?;
        self.post_tx(self.contract_tx(signed.order.maker, &call))
            .await
    }

    /// Amount of `order` that can still be filled.
    pub async fn available_volume(&self, order: &Order) -> Result<U256, SubmitError> {
        order.validate()?;
        let call = CallData::new("availableVolume")
            .arg(order)
            .map_err(DaemonError::from)?;
        let result = self.call_contract(order.maker, &call).await?;
        Ok(parse_number(&result)?)
    }

    pub async fn used_volume_by_hash(&self, hash: OrderHash) -> Result<U256, SubmitError> {
        let call = CallData::new("usedVolumeByHash")
            .arg(&hash)
            .map_err(DaemonError::from)?;
        let result = self.call_contract(Address::ZERO, &call).await?;
        Ok(parse_number(&result)?)
    }

    /// Balance of `token` that `user` holds in the contract.
    pub async fn deposit_amount(&self, user: Address, token: Address) -> Result<U256, SubmitError> {
        let call = CallData::new("getDepositAmount")
            .arg(&user)
            .and_then(|call| call.arg(&token))
            .map_err(DaemonError::from)?;
        let result = self.call_contract(user, &call).await?;
        let ret = parse_ret(&result)?;
        Ok(parse_u256(&ret).ok_or_else(|| DaemonError::Decode(format!("invalid amount {ret:?}")))?)
    }

    /// Dry-runs a trade, returning the contract's verdict.
    pub async fn test_taker_trade(
        &self,
        order: &Order,
        taker: Address,
        amount: U256,
    ) -> Result<String, SubmitError> {
        require_positive(amount, "amount")?;
        order.validate()?;
        let call = CallData::new("testTakerTrade")
            .arg(order)
            .and_then(|call| call.arg(&taker))
            .and_then(|call| call.arg(&amount))
            .map_err(DaemonError::from)?;
        let result = self.call_contract(taker, &call).await?;
        Ok(parse_ret(&result)?)
    }
}
