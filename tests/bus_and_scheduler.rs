use core::pin::pin;

use embassy_time::{Duration, Instant, Timer};
use futures::executor::block_on;
use futures::future::{Either, select};
use myrtio_msgbus::{Bus, BusError, Envelope, MessageQueue, Scheduler, Topic, TopicId};

/// Drives `scheduler.run()` until `body` completes.
fn with_scheduler<const Q: usize, const N: usize>(
    scheduler: &Scheduler<'_, Q, N>,
    body: impl Future<Output = ()>,
) {
    block_on(async {
        match select(pin!(scheduler.run()), pin!(body)).await {
            Either::Left((never, _)) => match never {},
            Either::Right(((), _)) => {}
        }
    });
}

#[test]
fn published_value_reaches_subscriber_as_envelope() {
    static DISPLAY: MessageQueue<4> = MessageQueue::new();
    static TEMP: Topic<'static, f32> = Topic::new("temp", 0.0);
    static BUS: Bus<'static, 4> = Bus::new();

    BUS.register(&TEMP).unwrap();
    BUS.subscribe("temp", &DISPLAY, 7).unwrap();

    assert_eq!(TEMP.publish(23.5), 0);

    let frame = DISPLAY.try_receive().expect("one frame delivered");
    assert_eq!(frame.len(), 8);
    let env = Envelope::<f32>::decode(&frame).unwrap();
    assert_eq!(env.command, 7);
    assert_eq!(env.payload, 23.5);
    assert!(DISPLAY.is_empty());
}

#[test]
fn unsubscribed_receiver_gets_nothing() {
    static INBOX: MessageQueue<4> = MessageQueue::new();
    static LEVEL: Topic<'static, u16> = Topic::new("level", 0);
    static BUS: Bus<'static, 4> = Bus::new();

    BUS.register(&LEVEL).unwrap();
    BUS.subscribe("level", &INBOX, 1).unwrap();
    BUS.unsubscribe("level", &INBOX, 1).unwrap();

    LEVEL.publish(40);
    assert!(INBOX.is_empty());
    assert_eq!(BUS.unsubscribe("level", &INBOX, 1), Err(BusError::SubNotFound));
}

fn accept_percent(value: &u8) -> bool {
    *value <= 100
}

#[test]
fn cross_task_write_goes_through_owner_handler() {
    static INBOX: MessageQueue<4> = MessageQueue::new();
    static BRIGHTNESS: Topic<'static, u8> = Topic::new("brightness", 0);
    static DIMMER: Topic<'static, u8> = Topic::new("dimmer", 0)
        .with_unit("%")
        .with_write_handler(&accept_percent);
    static BUS: Bus<'static, 4> = Bus::new();

    BUS.register(&DIMMER).unwrap();
    BUS.register(&BRIGHTNESS).unwrap();
    BUS.subscribe("dimmer", &INBOX, 3).unwrap();

    assert_eq!(BUS.request_write("dimmer", &50u8), Ok(()));
    assert_eq!(BUS.request_write("dimmer", &200u8), Err(BusError::WriteFailed));
    assert_eq!(BUS.request_write("dimmer", &50u32), Err(BusError::TypeMismatch));
    assert_eq!(
        BUS.request_write("brightness", &1u8),
        Err(BusError::WriteNotSupported)
    );
    assert_eq!(
        BUS.request_write(TopicId::from_name("missing"), &1u8),
        Err(BusError::TopicNotFound)
    );
    // Write requests never broadcast on their own.
    assert!(INBOX.is_empty());
    assert_eq!(BUS.topic_info("dimmer").map(|info| info.unit), Some("%"));
}

#[test]
fn one_shot_delivery_fires_once_after_delay() {
    static INBOX: MessageQueue<4> = MessageQueue::new();
    static SCHEDULER: Scheduler<'static, 4, 4> = Scheduler::new();

    with_scheduler(&SCHEDULER, async {
        let started = Instant::now();
        let env = Envelope::new(42u32, 9u16);
        SCHEDULER
            .schedule_envelope(&INBOX, &env, Duration::from_millis(100), false)
            .unwrap();

        let frame = INBOX.receive().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(95), "fired after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "fired after {elapsed:?}");
        assert_eq!(Envelope::<u16>::decode(&frame), Some(env));

        Timer::after(Duration::from_millis(150)).await;
        assert!(INBOX.is_empty());
    });
}

#[test]
fn periodic_delivery_repeats_until_cancelled() {
    static INBOX: MessageQueue<16> = MessageQueue::new();
    static SCHEDULER: Scheduler<'static, 4, 4> = Scheduler::new();

    with_scheduler(&SCHEDULER, async {
        let handle = SCHEDULER
            .schedule(&INBOX, &[0xAB], Duration::from_millis(50), true)
            .unwrap();

        Timer::after(Duration::from_millis(280)).await;
        let fired = INBOX.len();
        assert!((3..=6).contains(&fired), "fired {fired} times");

        assert!(SCHEDULER.cancel(handle));
        Timer::after(Duration::from_millis(20)).await;
        INBOX.clear();

        Timer::after(Duration::from_millis(150)).await;
        assert!(INBOX.is_empty());
    });
}

#[test]
fn earlier_deadline_fires_first() {
    static INBOX: MessageQueue<4> = MessageQueue::new();
    static SCHEDULER: Scheduler<'static, 4, 4> = Scheduler::new();

    with_scheduler(&SCHEDULER, async {
        SCHEDULER
            .schedule(&INBOX, b"late", Duration::from_millis(300), false)
            .unwrap();
        SCHEDULER
            .schedule(&INBOX, b"early", Duration::from_millis(100), false)
            .unwrap();

        assert_eq!(&INBOX.receive().await[..], b"early");
        assert_eq!(&INBOX.receive().await[..], b"late");
    });
}

#[test]
fn full_scheduler_hands_out_slots_again_after_delivery_and_cancel() {
    static INBOX: MessageQueue<4> = MessageQueue::new();
    static SCHEDULER: Scheduler<'static, 4, 1> = Scheduler::new();

    with_scheduler(&SCHEDULER, async {
        let first = SCHEDULER.schedule(&INBOX, &[1], Duration::from_millis(20), false);
        let second = SCHEDULER.schedule(&INBOX, &[2], Duration::from_millis(20), false);
        assert!(first.is_some());
        assert!(second.is_none());

        assert_eq!(&INBOX.receive().await[..], &[1u8]);

        let periodic = SCHEDULER
            .schedule(&INBOX, &[3], Duration::from_millis(50), true)
            .expect("slot freed by the delivered one-shot");
        assert!(SCHEDULER.cancel(periodic));
        Timer::after(Duration::from_millis(10)).await;

        let last = SCHEDULER.schedule(&INBOX, &[4], Duration::from_millis(10), false);
        assert!(last.is_some(), "slot freed by the cancel");
        assert_eq!(&INBOX.receive().await[..], &[4u8]);
        assert!(INBOX.is_empty());
    });
}

#[test]
fn invalid_schedules_are_refused() {
    static INBOX: MessageQueue<4> = MessageQueue::new();
    static SCHEDULER: Scheduler<'static, 4, 4> = Scheduler::new();

    assert!(SCHEDULER.schedule(&INBOX, &[], Duration::from_millis(10), false).is_none());
    assert!(SCHEDULER.schedule(&INBOX, &[1], Duration::from_ticks(0), true).is_none());
    assert!(SCHEDULER.schedule(&INBOX, &[0; 65], Duration::from_millis(10), false).is_none());
}
