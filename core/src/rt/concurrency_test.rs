//! Tests for scope reservation

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use crate::rt::{ActivityId, Reservation, ReservationState};

    fn wait_for_waiters(reservation: &Reservation, count: usize) {
        for _ in 0..500 {
            if reservation.waiting() == count {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("expected {} waiters, found {}", count, reservation.waiting());
    }

    #[test]
    fn reserve_is_reentrant() {
        let reservation = Reservation::new();
        let a = ActivityId::next();
        reservation.reserve(a).unwrap();
        reservation.reserve(a).unwrap();
        assert_eq!(reservation.state(), ReservationState::Held { activity: a, count: 2 });

        reservation.release(a).unwrap();
        assert_eq!(reservation.state(), ReservationState::Held { activity: a, count: 1 });
        reservation.release(a).unwrap();
        assert_eq!(reservation.state(), ReservationState::Free);
    }

    #[test]
    fn release_by_non_holder_fails() {
        let reservation = Reservation::new();
        let a = ActivityId::next();
        let b = ActivityId::next();
        assert!(reservation.release(a).is_err());

        reservation.reserve(a).unwrap();
        assert!(reservation.release(b).is_err());
        assert!(reservation.is_held_by(a));
    }

    #[test]
    fn try_reserve_never_waits() {
        let reservation = Reservation::new();
        let a = ActivityId::next();
        let b = ActivityId::next();
        assert!(reservation.try_reserve(a));
        assert!(reservation.try_reserve(a));
        assert!(!reservation.try_reserve(b));
        assert_eq!(reservation.waiting(), 0);
    }

    #[test]
    fn waiters_are_granted_in_arrival_order() {
        let reservation = Arc::new(Reservation::new());
        let holder = ActivityId::next();
        reservation.reserve(holder).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        let waiters: Vec<ActivityId> = (0..3).map(|_| ActivityId::next()).collect();
        for (i, &activity) in waiters.iter().enumerate() {
            let shared = reservation.clone();
            let order = order.clone();
            handles.push(thread::spawn(move || {
                shared.reserve(activity).unwrap();
                order.lock().unwrap().push(activity);
                shared.release(activity).unwrap();
            }));
            // Enqueue one at a time so arrival order is fixed.
            wait_for_waiters(&reservation, i + 1);
        }

        reservation.release(holder).unwrap();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), waiters);
        assert_eq!(reservation.state(), ReservationState::Free);
    }

    #[test]
    fn release_hands_off_before_waking() {
        let reservation = Arc::new(Reservation::new());
        let a = ActivityId::next();
        let b = ActivityId::next();
        reservation.reserve(a).unwrap();

        let (granted_tx, granted_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let waiter = {
            let reservation = reservation.clone();
            thread::spawn(move || {
                reservation.reserve(b).unwrap();
                granted_tx.send(()).unwrap();
                done_rx.recv().unwrap();
                reservation.release(b).unwrap();
            })
        };
        wait_for_waiters(&reservation, 1);

        reservation.release(a).unwrap();
        // Ownership moves at release time, not when the waiter runs.
        assert_eq!(reservation.state(), ReservationState::Held { activity: b, count: 1 });
        assert!(!reservation.try_reserve(a));
        granted_rx.recv().unwrap();
        assert!(reservation.is_held_by(b));

        done_tx.send(()).unwrap();
        waiter.join().unwrap();
        assert_eq!(reservation.state(), ReservationState::Free);
    }

    #[test]
    fn holder_stays_exclusive_under_contention() {
        let reservation = Arc::new(Reservation::new());
        let inside = Arc::new(Mutex::new(0usize));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reservation = reservation.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    let activity = ActivityId::next();
                    for _ in 0..50 {
                        let _guard = reservation.access(activity).unwrap();
                        // Nested reservation by the holder never queues.
                        reservation.reserve(activity).unwrap();
                        {
                            let mut count = inside.lock().unwrap();
                            *count += 1;
                            assert_eq!(*count, 1);
                        }
                        *inside.lock().unwrap() -= 1;
                        reservation.release(activity).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(reservation.state(), ReservationState::Free);
        assert_eq!(reservation.waiting(), 0);
    }

    #[test]
    fn force_release_clears_holder_and_queue() {
        let reservation = Arc::new(Reservation::new());
        let a = ActivityId::next();
        let b = ActivityId::next();
        reservation.reserve(a).unwrap();
        reservation.reserve(a).unwrap();

        let waiter = {
            let reservation = reservation.clone();
            thread::spawn(move || {
                reservation.reserve(b).unwrap();
                reservation.release(b).unwrap();
            })
        };
        wait_for_waiters(&reservation, 1);

        assert!(reservation.force_release(a));
        waiter.join().unwrap();
        assert_eq!(reservation.state(), ReservationState::Free);
        assert!(!reservation.force_release(a));
    }

    #[test]
    fn force_release_of_waiter_fails_its_reserve() {
        let reservation = Arc::new(Reservation::new());
        let a = ActivityId::next();
        let b = ActivityId::next();
        reservation.reserve(a).unwrap();

        let waiter = {
            let reservation = reservation.clone();
            thread::spawn(move || reservation.reserve(b))
        };
        wait_for_waiters(&reservation, 1);

        assert!(reservation.force_release(b));
        assert!(waiter.join().unwrap().is_err());
        assert!(reservation.is_held_by(a));
        assert_eq!(reservation.waiting(), 0);
    }

    #[test]
    fn guard_releases_on_drop() {
        let reservation = Reservation::new();
        let a = ActivityId::next();
        {
            let guard = reservation.access(a).unwrap();
            assert_eq!(guard.activity(), a);
            assert!(reservation.is_held_by(a));
        }
        assert_eq!(reservation.state(), ReservationState::Free);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_waiters_are_handed_off() {
        let reservation = Arc::new(Reservation::new());
        let a = ActivityId::next();
        let b = ActivityId::next();
        reservation.reserve_async(a).await.unwrap();

        let task = {
            let reservation = reservation.clone();
            tokio::spawn(async move {
                reservation.reserve_async(b).await.unwrap();
                let state = reservation.state();
                reservation.release(b).unwrap();
                state
            })
        };
        while reservation.waiting() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        reservation.release(a).unwrap();
        assert_eq!(task.await.unwrap(), ReservationState::Held { activity: b, count: 1 });
        assert_eq!(reservation.state(), ReservationState::Free);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn async_waiters_keep_arrival_order() {
        let reservation = Arc::new(Reservation::new());
        let holder = ActivityId::next();
        reservation.reserve_async(holder).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let waiters: Vec<ActivityId> = (0..4).map(|_| ActivityId::next()).collect();
        let mut tasks = Vec::new();
        for (i, &activity) in waiters.iter().enumerate() {
            let shared = reservation.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                shared.reserve_async(activity).await.unwrap();
                order.lock().unwrap().push(activity);
                shared.release(activity).unwrap();
            }));
            while reservation.waiting() < i + 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        reservation.release(holder).unwrap();
        for joined in futures::future::join_all(tasks).await {
            joined.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), waiters);
        assert_eq!(reservation.state(), ReservationState::Free);
    }

    #[tokio::test]
    async fn dropped_async_waiter_passes_reservation_on() {
        let reservation = Reservation::new();
        let a = ActivityId::next();
        let b = ActivityId::next();
        let c = ActivityId::next();
        reservation.reserve(a).unwrap();

        let mut for_b = Box::pin(reservation.reserve_async(b));
        assert!(futures::poll!(for_b.as_mut()).is_pending());
        let mut for_c = Box::pin(reservation.reserve_async(c));
        assert!(futures::poll!(for_c.as_mut()).is_pending());
        assert_eq!(reservation.waiting(), 2);

        // b is granted but its caller gives up before looking.
        reservation.release(a).unwrap();
        assert!(reservation.is_held_by(b));
        drop(for_b);
        assert_eq!(reservation.state(), ReservationState::Held { activity: c, count: 1 });

        for_c.await.unwrap();
        reservation.release(c).unwrap();
        assert_eq!(reservation.state(), ReservationState::Free);
    }

    #[tokio::test]
    async fn dropped_async_waiter_leaves_the_queue() {
        let reservation = Reservation::new();
        let a = ActivityId::next();
        let b = ActivityId::next();
        reservation.reserve(a).unwrap();

        let mut for_b = Box::pin(reservation.reserve_async(b));
        assert!(futures::poll!(for_b.as_mut()).is_pending());
        assert_eq!(reservation.waiting(), 1);
        drop(for_b);
        assert_eq!(reservation.waiting(), 0);

        reservation.release(a).unwrap();
        assert_eq!(reservation.state(), ReservationState::Free);
    }
}
