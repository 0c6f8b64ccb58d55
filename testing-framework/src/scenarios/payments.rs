// File: testing-framework/src/scenarios/payments.rs
//
// Invoice payments over one channel and across a two hop route.

use super::helpers::{close_channel_and_assert, open_channel_and_assert};
use crate::assertions::poll::recv_within;
use crate::assertions::{
    assert_channel_invariants, wait_for_asymmetric_balance, wait_for_balance, wait_for_invoice_settled,
    wait_for_route_table, PaymentDispatcher,
};
use crate::error::RpcResultExt;
use crate::harness::NetworkHarness;
use crate::invariants;
use crate::node::LightningNode;
use anyhow::{ensure, Context};
use futures::future::{BoxFuture, FutureExt};
use ln_itest_common::{
    channel::RoutingLink,
    config::SATOSHI_PER_BITCOIN,
    crypto::Hash,
    invoice::{PaymentOutcome, SendRequest},
    transaction::OutPoint,
    Amount,
};
use std::collections::HashSet;

const CHANNEL_AMOUNT: Amount = 100_000;
const PAYMENT_AMOUNT: Amount = 1_000;
const NUM_PAYMENTS: u8 = 5;

async fn local_balance(node: &LightningNode, channel_point: &OutPoint) -> anyhow::Result<Amount> {
    let channels = node.list_channels().await.rpc("ListChannels")?;
    channels
        .iter()
        .find(|c| c.channel_point == *channel_point)
        .map(|c| c.local_balance)
        .with_context(|| format!("{} does not list channel {}", node, channel_point))
}

/// Alice pays one invoice of Bob over their direct channel.
pub fn single_hop_invoice(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        let (alice, bob) = (harness.alice(), harness.bob());
        let channel_point = open_channel_and_assert(harness, alice, bob, CHANNEL_AMOUNT).await?;

        let preimage = Hash::new([b'A'; 32]);
        let invoice = bob
            .add_invoice("testing", preimage, PAYMENT_AMOUNT)
            .await
            .rpc("AddInvoice")?;

        let stream = alice.send_payment().await.rpc("SendPayment")?;
        let (sender, mut responses) = stream.into_split();
        sender
            .send(SendRequest {
                payment_hash: invoice.r_hash,
                dest: bob.pubkey(),
                amount: PAYMENT_AMOUNT,
            })
            .await
            .rpc("SendPayment")?;
        let response = recv_within(
            harness.env().clock.as_ref(),
            &mut responses,
            "SendPayment",
            harness.config().payment_deadline(),
        )
        .await?;

        ensure!(
            response.payment_hash == invoice.r_hash,
            "response for {} while paying {}",
            response.payment_hash,
            invoice.r_hash
        );
        match &response.outcome {
            PaymentOutcome::Settled { preimage: revealed, .. } => ensure!(
                *revealed == preimage,
                "payment settled with the wrong preimage {}",
                revealed
            ),
            PaymentOutcome::Failed { reason } => anyhow::bail!("payment failed: {}", reason),
        }

        wait_for_invoice_settled(harness, bob, &invoice.r_hash)
            .await
            .context("bob's invoice was not settled")?;

        wait_for_balance(harness, alice, CHANNEL_AMOUNT - PAYMENT_AMOUNT)
            .await
            .context("alice's balance was not debited")?;
        wait_for_balance(harness, bob, PAYMENT_AMOUNT)
            .await
            .context("bob's balance was not credited")?;
        assert_channel_invariants(alice).await?;

        close_channel_and_assert(harness, alice, &channel_point).await?;
        Ok(())
    }
    .boxed()
}

/// Carol pays five invoices of Bob concurrently, routed through Alice.
pub fn multi_hop_payments(harness: &NetworkHarness) -> BoxFuture<'_, anyhow::Result<()>> {
    async move {
        let (alice, bob) = (harness.alice(), harness.bob());
        let alice_cp = open_channel_and_assert(harness, alice, bob, CHANNEL_AMOUNT).await?;

        let carol = harness.new_node("Carol").await.context("unable to start carol")?;
        harness
            .connect_nodes(&carol, alice)
            .await
            .context("unable to connect carol to alice")?;
        harness
            .send_coins(SATOSHI_PER_BITCOIN, &carol)
            .await
            .context("unable to fund carol")?;

        let carol_cp = open_channel_and_assert(harness, &carol, alice, CHANNEL_AMOUNT).await?;

        let mut requests = Vec::new();
        for i in 0..NUM_PAYMENTS {
            let invoice = bob
                .add_invoice("testing", Hash::new([i; 32]), PAYMENT_AMOUNT)
                .await
                .rpc("AddInvoice")?;
            requests.push(SendRequest {
                payment_hash: invoice.r_hash,
                dest: bob.pubkey(),
                amount: PAYMENT_AMOUNT,
            });
        }
        let hashes: HashSet<Hash> = requests.iter().map(|r| r.payment_hash).collect();

        let expected_links = [
            RoutingLink::new(alice_cp, alice.pubkey(), bob.pubkey(), CHANNEL_AMOUNT),
            RoutingLink::new(carol_cp, carol.pubkey(), alice.pubkey(), CHANNEL_AMOUNT),
        ];
        wait_for_route_table(harness, &carol, &expected_links)
            .await
            .context("carol never learned the route to bob")?;

        let payer_before = local_balance(&carol, &carol_cp).await?;
        let payee_before = local_balance(bob, &alice_cp).await?;

        let dispatcher = PaymentDispatcher::new(carol.send_payment().await.rpc("SendPayment")?);
        let responses = dispatcher
            .dispatch_all(
                requests,
                harness.env().clock.as_ref(),
                harness.config().payment_deadline(),
            )
            .await
            .context("concurrent payments did not complete")?;

        ensure!(
            responses.len() == NUM_PAYMENTS as usize,
            "{} response(s) for {} payments",
            responses.len(),
            NUM_PAYMENTS
        );
        for response in &responses {
            ensure!(
                hashes.contains(&response.payment_hash),
                "response for unknown payment {}",
                response.payment_hash
            );
            match &response.outcome {
                PaymentOutcome::Settled { hops, .. } => {
                    ensure!(*hops == 2, "payment {} took {} hop(s)", response.payment_hash, hops)
                }
                PaymentOutcome::Failed { reason } => {
                    anyhow::bail!("payment {} failed: {}", response.payment_hash, reason)
                }
            }
        }
        for hash in &hashes {
            wait_for_invoice_settled(harness, bob, hash).await?;
        }

        let sent = NUM_PAYMENTS as Amount * PAYMENT_AMOUNT;
        let kept = CHANNEL_AMOUNT - sent;
        wait_for_asymmetric_balance(harness, &carol, &carol_cp, kept, sent)
            .await
            .context("carol's side of carol -> alice")?;
        wait_for_asymmetric_balance(harness, alice, &carol_cp, sent, kept)
            .await
            .context("alice's side of carol -> alice")?;
        wait_for_asymmetric_balance(harness, alice, &alice_cp, kept, sent)
            .await
            .context("alice's side of alice -> bob")?;
        wait_for_asymmetric_balance(harness, bob, &alice_cp, sent, kept)
            .await
            .context("bob's side of alice -> bob")?;

        // The batch moved exactly N * A from carol's end to bob's end
        invariants::check_balance_shift(
            carol_cp,
            payer_before,
            local_balance(&carol, &carol_cp).await?,
            -(sent as i128),
        )?;
        invariants::check_balance_shift(
            alice_cp,
            payee_before,
            local_balance(bob, &alice_cp).await?,
            sent as i128,
        )?;
        for node in [alice, bob, &carol] {
            assert_channel_invariants(node).await?;
        }

        close_channel_and_assert(harness, alice, &alice_cp).await?;
        close_channel_and_assert(harness, &carol, &carol_cp).await?;
        Ok(())
    }
    .boxed()
}
