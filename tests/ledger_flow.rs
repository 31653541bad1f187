//! End-to-end flows over the in-process store: purchase with commission
//! fan-out, claim cooldowns, recharge and withdrawal lifecycles, and the
//! concurrent-loser cases that exercise the compare-and-swap retry path.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;

use harvest_ledger::models::catalog::{CatalogEntry, SiteSettings};
use harvest_ledger::models::transactions::{RequestKind, RequestStatus, Verdict};
use harvest_ledger::models::users::{BankCard, Holding, PaymentMethod, User};
use harvest_ledger::repositories::ledger::LedgerRepository;
use harvest_ledger::services::claims::ClaimRequestHandler;
use harvest_ledger::services::commission::{CommissionRequest, CommissionRequestHandler};
use harvest_ledger::services::purchases::PurchaseRequestHandler;
use harvest_ledger::services::transactions::TransactionRequestHandler;
use harvest_ledger::services::users::UserRequestHandler;
use harvest_ledger::services::ServiceError;
use harvest_ledger::store::memory::MemoryStore;
use harvest_ledger::store::TreeStore;
use harvest_ledger::utils;

const PASSWORD: &str = "secret123";

fn seed_user(id: &str, mobile: &str, code: &str, referrer_id: Option<&str>) -> User {
    let salt = "fixed-salt".to_string();
    User {
        id: id.to_string(),
        mobile_number: mobile.to_string(),
        full_name: format!("User {}", id),
        password_hash: utils::hash_password(PASSWORD, &salt),
        password_salt: salt,
        balance: 0,
        recharge_balance: 0,
        total_income: 0,
        team_commission: 0,
        investments: BTreeMap::new(),
        recharge_history: BTreeMap::new(),
        withdrawal_history: BTreeMap::new(),
        commission_history: BTreeMap::new(),
        income_history: BTreeMap::new(),
        bank_card: None,
        last_bonus_claim_time: None,
        referral_code: code.to_string(),
        referrer_id: referrer_id.map(str::to_string),
        referrer_code: None,
        registration_date: Utc::now(),
    }
}

fn package(id: &str, price: i64, daily_income: i64) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        title: format!("Package {}", id),
        price,
        daily_income,
        cycle: 45,
        tag: None,
        image: None,
    }
}

fn holding_bought(price: i64, daily_income: i64, hours_ago: i64) -> Holding {
    let when = Utc::now() - Duration::hours(hours_ago);
    Holding {
        catalog_id: "pkg_seeded".to_string(),
        title: "Seeded Package".to_string(),
        price,
        daily_income,
        cycle: 45,
        tag: None,
        image: None,
        purchase_date: when,
        last_claim_time: Some(when),
    }
}

fn repository(store: &Arc<MemoryStore>) -> LedgerRepository {
    LedgerRepository::new(store.clone())
}

/// Run the queued commission work synchronously so assertions see the
/// final ancestor balances.
async fn settle_commissions(
    handler: &CommissionRequestHandler,
    rx: &mut mpsc::Receiver<CommissionRequest>,
) {
    while let Ok(CommissionRequest::Propagate { buyer_id, price }) = rx.try_recv() {
        handler.propagate(&buyer_id, price).await;
    }
}

#[tokio::test]
async fn purchase_pays_commission_up_a_two_level_chain() {
    let store = Arc::new(MemoryStore::new());
    store.put_user(seed_user("uid_r2", "01712000002", "22222", None));
    store.put_user(seed_user("uid_r1", "01712000001", "11111", Some("uid_r2")));
    let mut buyer = seed_user("uid_b", "01712000000", "00000", Some("uid_r1"));
    buyer.recharge_balance = 100_000; // 1000 taka
    store.put_user(buyer);
    store.set_catalog(vec![package("pkg_1", 100_000, 6_000)]);

    let repo = repository(&store);
    let (commission_tx, mut commission_rx) = mpsc::channel(8);
    let purchases = PurchaseRequestHandler::new(repo.clone(), commission_tx);
    let commissions = CommissionRequestHandler::new(repo);

    let receipt = purchases.purchase("uid_b", "pkg_1").await.unwrap();
    assert_eq!(receipt.price, 100_000);
    assert_eq!(receipt.recharge_balance, 0);

    settle_commissions(&commissions, &mut commission_rx).await;

    // 15% to the direct referrer, 3% to its referrer; the chain ends there.
    let r1 = store.read_user("uid_r1").await.unwrap().unwrap();
    assert_eq!(r1.balance, 15_000);
    assert_eq!(r1.team_commission, 15_000);
    assert_eq!(r1.total_income, 15_000);
    let record = r1.commission_history.values().next().unwrap();
    assert_eq!(record.from, "uid_b");
    assert_eq!(record.level, 1);
    assert_eq!(record.amount, 15_000);

    let r2 = store.read_user("uid_r2").await.unwrap().unwrap();
    assert_eq!(r2.balance, 3_000);
    assert_eq!(r2.commission_history.len(), 1);
    assert_eq!(r2.commission_history.values().next().unwrap().level, 2);

    let buyer = store.read_user("uid_b").await.unwrap().unwrap();
    assert_eq!(buyer.recharge_balance, 0);
    assert_eq!(buyer.investments.len(), 1);
    assert!(buyer.commission_history.is_empty());
}

#[tokio::test]
async fn commission_fans_out_to_exactly_three_levels() {
    let store = Arc::new(MemoryStore::new());
    store.put_user(seed_user("uid_r4", "01712000004", "44444", None));
    store.put_user(seed_user("uid_r3", "01712000003", "33333", Some("uid_r4")));
    store.put_user(seed_user("uid_r2", "01712000002", "22222", Some("uid_r3")));
    store.put_user(seed_user("uid_r1", "01712000001", "11111", Some("uid_r2")));
    let mut buyer = seed_user("uid_b", "01712000000", "00000", Some("uid_r1"));
    buyer.recharge_balance = 100_000;
    store.put_user(buyer);
    store.set_catalog(vec![package("pkg_1", 100_000, 6_000)]);

    let repo = repository(&store);
    let (commission_tx, mut commission_rx) = mpsc::channel(8);
    let purchases = PurchaseRequestHandler::new(repo.clone(), commission_tx);
    let commissions = CommissionRequestHandler::new(repo);

    purchases.purchase("uid_b", "pkg_1").await.unwrap();
    settle_commissions(&commissions, &mut commission_rx).await;

    let expected = [("uid_r1", 15_000), ("uid_r2", 3_000), ("uid_r3", 2_000)];
    for (level, (id, amount)) in expected.iter().enumerate() {
        let ancestor = store.read_user(id).await.unwrap().unwrap();
        assert_eq!(ancestor.balance, *amount, "{}", id);
        let record = ancestor.commission_history.values().next().unwrap();
        assert_eq!(record.level as usize, level + 1);
    }

    // The fourth ancestor is beyond the commission depth.
    let r4 = store.read_user("uid_r4").await.unwrap().unwrap();
    assert_eq!(r4.balance, 0);
    assert!(r4.commission_history.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_purchases_of_the_same_package_leave_one_holding() {
    let store = Arc::new(MemoryStore::new());
    let mut buyer = seed_user("uid_b", "01712000000", "00000", None);
    buyer.recharge_balance = 200_000; // enough for two, ownership breaks the tie
    store.put_user(buyer);
    store.set_catalog(vec![package("pkg_1", 100_000, 6_000)]);

    let repo = repository(&store);
    let (commission_tx, _commission_rx) = mpsc::channel(8);
    let purchases = PurchaseRequestHandler::new(repo, commission_tx);

    let (first, second) = tokio::join!(
        purchases.purchase("uid_b", "pkg_1"),
        purchases.purchase("uid_b", "pkg_1"),
    );

    let results = [first, second];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(loser, Err(ServiceError::AlreadyOwned)));

    let buyer = store.read_user("uid_b").await.unwrap().unwrap();
    assert_eq!(buyer.investments.len(), 1);
    assert_eq!(buyer.recharge_balance, 100_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_purchases_with_funds_for_one_report_the_shortfall() {
    let store = Arc::new(MemoryStore::new());
    let mut buyer = seed_user("uid_b", "01712000000", "00000", None);
    buyer.recharge_balance = 150_000; // one full price plus change
    store.put_user(buyer);
    store.set_catalog(vec![package("pkg_1", 100_000, 6_000), package("pkg_2", 100_000, 6_000)]);

    let repo = repository(&store);
    let (commission_tx, _commission_rx) = mpsc::channel(8);
    let purchases = PurchaseRequestHandler::new(repo, commission_tx);

    let (first, second) = tokio::join!(
        purchases.purchase("uid_b", "pkg_1"),
        purchases.purchase("uid_b", "pkg_2"),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loser,
        Err(ServiceError::InsufficientFunds { shortfall: 50_000 })
    ));

    let buyer = store.read_user("uid_b").await.unwrap().unwrap();
    assert_eq!(buyer.investments.len(), 1);
    assert_eq!(buyer.recharge_balance, 50_000);
}

#[tokio::test]
async fn income_claim_pays_once_per_window() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    user.investments
        .insert("inv_1".to_string(), holding_bought(100_000, 6_000, 25));
    store.put_user(user);

    let claims = ClaimRequestHandler::new(repository(&store));

    let receipt = claims.claim_income("uid_u", "inv_1").await.unwrap();
    assert_eq!(receipt.amount, 6_000);
    assert_eq!(receipt.balance, 6_000);
    assert_eq!(receipt.total_income, 6_000);

    // Immediately claiming again is inside the fresh 24h window.
    let again = claims.claim_income("uid_u", "inv_1").await;
    match again {
        Err(ServiceError::NotYetEligible { seconds_remaining }) => {
            assert!(seconds_remaining > 0);
        }
        other => panic!("expected NotYetEligible, got {:?}", other.map(|r| r.amount)),
    }

    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.balance, 6_000);
    assert_eq!(user.income_history.len(), 1);
}

#[tokio::test]
async fn unclaimed_holding_anchors_on_purchase_date() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    let mut holding = holding_bought(100_000, 6_000, 25);
    holding.last_claim_time = None;
    user.investments.insert("inv_1".to_string(), holding);
    store.put_user(user);

    let claims = ClaimRequestHandler::new(repository(&store));
    let receipt = claims.claim_income("uid_u", "inv_1").await.unwrap();
    assert_eq!(receipt.amount, 6_000);

    let missing = claims.claim_income("uid_u", "inv_9").await;
    assert!(matches!(missing, Err(ServiceError::UnknownHolding(_))));
}

#[tokio::test]
async fn bonus_recomputes_principal_at_claim_time() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    // One holding predates the cooldown window, one was bought mid-window.
    // Both count: principal is read live at claim time, never cached.
    user.investments
        .insert("inv_1".to_string(), holding_bought(100_000, 6_000, 30));
    user.investments
        .insert("inv_2".to_string(), holding_bought(100_000, 6_000, 5));
    user.last_bonus_claim_time = Some(Utc::now() - Duration::hours(25));
    store.put_user(user);

    let claims = ClaimRequestHandler::new(repository(&store));

    let receipt = claims.claim_bonus("uid_u").await.unwrap();
    assert_eq!(receipt.amount, 1_000); // 0.50% of 200_000
    assert_eq!(receipt.balance, 1_000);

    let again = claims.claim_bonus("uid_u").await;
    assert!(matches!(again, Err(ServiceError::NotYetEligible { .. })));
}

#[tokio::test]
async fn bonus_requires_live_principal() {
    let store = Arc::new(MemoryStore::new());
    store.put_user(seed_user("uid_u", "01712000000", "00000", None));

    let claims = ClaimRequestHandler::new(repository(&store));
    let denied = claims.claim_bonus("uid_u").await;
    assert!(matches!(denied, Err(ServiceError::NoEligiblePrincipal)));
}

#[tokio::test]
async fn recharge_credits_only_on_approval() {
    let store = Arc::new(MemoryStore::new());
    store.put_user(seed_user("uid_u", "01712000000", "00000", None));

    let transactions = TransactionRequestHandler::new(repository(&store));

    let receipt = transactions
        .submit_recharge("uid_u", 50_000, "AB12CD34EF")
        .await
        .unwrap();

    // Pending: the reference is recorded but nothing is spendable yet.
    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.recharge_balance, 0);
    let pending = &user.recharge_history[&receipt.request_key];
    assert_eq!(pending.status, RequestStatus::Pending);
    assert_eq!(pending.trx_id, "AB12CD34EF");

    transactions
        .review("uid_u", RequestKind::Recharge, &receipt.request_key, Verdict::Approve)
        .await
        .unwrap();

    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.recharge_balance, 50_000);
    assert_eq!(
        user.recharge_history[&receipt.request_key].status,
        RequestStatus::Successful
    );

    // Terminal requests are immutable, even under a second approval.
    let replay = transactions
        .review("uid_u", RequestKind::Recharge, &receipt.request_key, Verdict::Approve)
        .await;
    assert!(matches!(replay, Err(ServiceError::RequestAlreadyProcessed)));
    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.recharge_balance, 50_000);
}

#[tokio::test]
async fn recharge_rejects_bad_and_duplicate_references() {
    let store = Arc::new(MemoryStore::new());
    store.put_user(seed_user("uid_a", "01712000001", "11111", None));
    store.put_user(seed_user("uid_b", "01712000002", "22222", None));

    let transactions = TransactionRequestHandler::new(repository(&store));

    let short = transactions.submit_recharge("uid_a", 50_000, "ABC123").await;
    assert!(matches!(short, Err(ServiceError::InvalidReference)));

    let zero = transactions.submit_recharge("uid_a", 0, "AB12CD34EF").await;
    assert!(matches!(zero, Err(ServiceError::InvalidAmount)));

    transactions
        .submit_recharge("uid_a", 50_000, "AB12CD34EF")
        .await
        .unwrap();

    // The duplicate scan is global, not per user.
    let duplicate = transactions
        .submit_recharge("uid_b", 30_000, "AB12CD34EF")
        .await;
    assert!(matches!(duplicate, Err(ServiceError::DuplicateReference)));
}

#[tokio::test]
async fn withdrawal_debits_up_front_and_compensates_on_failure() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    user.balance = 100_000;
    user.bank_card = Some(BankCard {
        name: "User".to_string(),
        payment_method: PaymentMethod::Bkash,
        account_number: "01712000000".to_string(),
    });
    store.put_user(user);

    let transactions = TransactionRequestHandler::new(repository(&store));

    let receipt = transactions
        .submit_withdrawal("uid_u", 50_000, PASSWORD)
        .await
        .unwrap();
    assert_eq!(receipt.charge, 3_500); // 7%
    assert_eq!(receipt.received, 46_500);
    assert_eq!(receipt.balance, 50_000);

    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.balance, 50_000);
    let pending = &user.withdrawal_history[&receipt.request_key];
    assert_eq!(pending.status, RequestStatus::Pending);
    assert_eq!(pending.payment_method, PaymentMethod::Bkash);

    // Failure puts the full debit back.
    transactions
        .review("uid_u", RequestKind::Withdrawal, &receipt.request_key, Verdict::Fail)
        .await
        .unwrap();

    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.balance, 100_000);
    assert_eq!(
        user.withdrawal_history[&receipt.request_key].status,
        RequestStatus::Failed
    );

    let replay = transactions
        .review("uid_u", RequestKind::Withdrawal, &receipt.request_key, Verdict::Fail)
        .await;
    assert!(matches!(replay, Err(ServiceError::RequestAlreadyProcessed)));
    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.balance, 100_000);
}

#[tokio::test]
async fn withdrawal_approval_is_balance_neutral() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    user.balance = 100_000;
    user.bank_card = Some(BankCard {
        name: "User".to_string(),
        payment_method: PaymentMethod::Nagad,
        account_number: "01712000000".to_string(),
    });
    store.put_user(user);

    let transactions = TransactionRequestHandler::new(repository(&store));

    let receipt = transactions
        .submit_withdrawal("uid_u", 20_000, PASSWORD)
        .await
        .unwrap();

    transactions
        .review("uid_u", RequestKind::Withdrawal, &receipt.request_key, Verdict::Approve)
        .await
        .unwrap();

    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.balance, 80_000);
    assert_eq!(
        user.withdrawal_history[&receipt.request_key].status,
        RequestStatus::Successful
    );
}

#[tokio::test]
async fn withdrawal_guards_run_in_order() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    user.balance = 30_000;
    store.put_user(user);

    let transactions = TransactionRequestHandler::new(repository(&store));

    let small = transactions.submit_withdrawal("uid_u", 19_999, PASSWORD).await;
    assert!(matches!(
        small,
        Err(ServiceError::BelowMinimumWithdrawal { minimum: 20_000 })
    ));

    let wrong_password = transactions.submit_withdrawal("uid_u", 20_000, "nope").await;
    assert!(matches!(
        wrong_password,
        Err(ServiceError::AuthenticationFailed)
    ));

    // Right password, but no payout destination on file.
    let no_card = transactions.submit_withdrawal("uid_u", 20_000, PASSWORD).await;
    assert!(matches!(no_card, Err(ServiceError::MissingBankCard)));

    // Card set; now the balance check is the binding one.
    let users = UserRequestHandler::new(repository(&store));
    users
        .set_bank_card(
            "uid_u",
            BankCard {
                name: "User".to_string(),
                payment_method: PaymentMethod::Bkash,
                account_number: "01712000000".to_string(),
            },
        )
        .await
        .unwrap();

    let too_much = transactions.submit_withdrawal("uid_u", 50_000, PASSWORD).await;
    assert!(matches!(
        too_much,
        Err(ServiceError::InsufficientBalance { shortfall: 20_000 })
    ));

    // No debit happened along the way.
    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.balance, 30_000);
    assert!(user.withdrawal_history.is_empty());
}

#[tokio::test]
async fn extreme_withdrawal_amount_fails_without_panicking() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    user.balance = 30_000;
    user.bank_card = Some(BankCard {
        name: "User".to_string(),
        payment_method: PaymentMethod::Bkash,
        account_number: "01712000000".to_string(),
    });
    store.put_user(user);

    let transactions = TransactionRequestHandler::new(repository(&store));

    // A well-formed but absurd amount must come back as a shortfall, not
    // blow up in the fee arithmetic.
    let denied = transactions
        .submit_withdrawal("uid_u", i64::MAX, PASSWORD)
        .await;
    assert!(matches!(denied, Err(ServiceError::InsufficientBalance { .. })));

    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.balance, 30_000);
    assert!(user.withdrawal_history.is_empty());
}

#[tokio::test]
async fn offline_site_rejects_balance_mutations() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    user.balance = 100_000;
    user.recharge_balance = 100_000;
    user.investments
        .insert("inv_1".to_string(), holding_bought(100_000, 6_000, 25));
    user.bank_card = Some(BankCard {
        name: "User".to_string(),
        payment_method: PaymentMethod::Bkash,
        account_number: "01712000000".to_string(),
    });
    store.put_user(user);
    store.set_catalog(vec![package("pkg_1", 100_000, 6_000)]);
    store.set_site_settings(SiteSettings {
        is_site_online: false,
        is_withdrawal_enabled: true,
    });

    let repo = repository(&store);
    let transactions = TransactionRequestHandler::new(repo.clone());
    let (commission_tx, _commission_rx) = mpsc::channel(8);
    let purchases = PurchaseRequestHandler::new(repo.clone(), commission_tx);
    let claims = ClaimRequestHandler::new(repo);

    let purchase = purchases.purchase("uid_u", "pkg_1").await;
    assert!(matches!(purchase, Err(ServiceError::SiteOffline)));

    let income = claims.claim_income("uid_u", "inv_1").await;
    assert!(matches!(income, Err(ServiceError::SiteOffline)));

    let bonus = claims.claim_bonus("uid_u").await;
    assert!(matches!(bonus, Err(ServiceError::SiteOffline)));

    let recharge = transactions
        .submit_recharge("uid_u", 50_000, "AB12CD34EF")
        .await;
    assert!(matches!(recharge, Err(ServiceError::SiteOffline)));

    let withdrawal = transactions
        .submit_withdrawal("uid_u", 20_000, PASSWORD)
        .await;
    assert!(matches!(withdrawal, Err(ServiceError::SiteOffline)));

    // Nothing moved while the site was down.
    let user = store.read_user("uid_u").await.unwrap().unwrap();
    assert_eq!(user.balance, 100_000);
    assert_eq!(user.recharge_balance, 100_000);
}

#[tokio::test]
async fn withdrawals_can_be_disabled_site_wide() {
    let store = Arc::new(MemoryStore::new());
    let mut user = seed_user("uid_u", "01712000000", "00000", None);
    user.balance = 100_000;
    store.put_user(user);
    store.set_site_settings(SiteSettings {
        is_site_online: true,
        is_withdrawal_enabled: false,
    });

    let transactions = TransactionRequestHandler::new(repository(&store));
    let denied = transactions.submit_withdrawal("uid_u", 20_000, PASSWORD).await;
    assert!(matches!(denied, Err(ServiceError::WithdrawalsDisabled)));
}

#[tokio::test]
async fn team_report_counts_three_levels_and_splits_commission() {
    let store = Arc::new(MemoryStore::new());
    store.put_user(seed_user("uid_root", "01712000000", "00000", None));
    store.put_user(seed_user("uid_l1a", "01712000001", "11111", Some("uid_root")));
    store.put_user(seed_user("uid_l1b", "01712000002", "22222", Some("uid_root")));
    store.put_user(seed_user("uid_l2", "01712000003", "33333", Some("uid_l1a")));
    store.put_user(seed_user("uid_l3", "01712000004", "44444", Some("uid_l2")));
    // Level 4 must not appear anywhere in the report.
    store.put_user(seed_user("uid_l4", "01712000005", "55555", Some("uid_l3")));
    store.set_catalog(vec![package("pkg_1", 100_000, 6_000)]);

    let repo = repository(&store);
    let commissions = CommissionRequestHandler::new(repo.clone());
    // A purchase by the level-2 member pays the root at level 2.
    commissions.propagate("uid_l2", 100_000).await;

    let users = UserRequestHandler::new(repo);
    let report = users.team_report("uid_root").await.unwrap();
    assert_eq!(report.levels[0].members, 2);
    assert_eq!(report.levels[1].members, 1);
    assert_eq!(report.levels[2].members, 1);
    assert_eq!(report.levels[0].commission_income, 0);
    assert_eq!(report.levels[1].commission_income, 3_000);
}

#[tokio::test]
async fn full_scenario_recharge_purchase_claim_withdraw() {
    let store = Arc::new(MemoryStore::new());
    store.put_user(seed_user("uid_ref", "01712000009", "99999", None));
    let mut user = seed_user("uid_u", "01712000000", "00000", Some("uid_ref"));
    user.bank_card = Some(BankCard {
        name: "User".to_string(),
        payment_method: PaymentMethod::Bkash,
        account_number: "01712000000".to_string(),
    });
    store.put_user(user);
    store.set_catalog(vec![package("pkg_1", 100_000, 6_000)]);

    let repo = repository(&store);
    let transactions = TransactionRequestHandler::new(repo.clone());
    let (commission_tx, mut commission_rx) = mpsc::channel(8);
    let purchases = PurchaseRequestHandler::new(repo.clone(), commission_tx);
    let commissions = CommissionRequestHandler::new(repo.clone());
    let claims = ClaimRequestHandler::new(repo);

    // Deposit 1000 taka and have it approved.
    let recharge = transactions
        .submit_recharge("uid_u", 100_000, "TX00AA11BB")
        .await
        .unwrap();
    transactions
        .review("uid_u", RequestKind::Recharge, &recharge.request_key, Verdict::Approve)
        .await
        .unwrap();

    // Buy the package; the referrer earns 15%.
    let purchase = purchases.purchase("uid_u", "pkg_1").await.unwrap();
    settle_commissions(&commissions, &mut commission_rx).await;
    let referrer = store.read_user("uid_ref").await.unwrap().unwrap();
    assert_eq!(referrer.balance, 15_000);

    // Fresh purchase means nothing is claimable yet.
    let early = claims.claim_income("uid_u", &purchase.holding_key).await;
    assert!(matches!(early, Err(ServiceError::NotYetEligible { .. })));

    // Age the holding past the window, then claim.
    store
        .transact_user("uid_u", &mut |current| {
            let mut user = current.unwrap();
            let holding = user.investments.get_mut(&purchase.holding_key).unwrap();
            holding.last_claim_time = Some(Utc::now() - Duration::hours(25));
            harvest_ledger::store::Transition::Commit(user)
        })
        .await
        .unwrap();
    let claim = claims.claim_income("uid_u", &purchase.holding_key).await.unwrap();
    assert_eq!(claim.amount, 6_000);

    // Income alone is below the withdrawal floor.
    let denied = transactions.submit_withdrawal("uid_u", 20_000, PASSWORD).await;
    assert!(matches!(
        denied,
        Err(ServiceError::InsufficientBalance { shortfall: 14_000 })
    ));
}
