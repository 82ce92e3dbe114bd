// MOBATCH EVENT LOG
// ONE ENTRY PER HANDLED REQUEST.
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION PER REQUEST.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.
// TOTALS ARE KEPT OUTSIDE THE RING SO THE SUMMARY SURVIVES WRAPPING.

use crate::store::ModelSource;

const MAX_EVENTS: usize = 8192;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Route {
    Predict,
    Update,
    Reject,
}

impl Route {
    pub fn label(self) -> &'static str {
        match self {
            Self::Predict => "PREDICT",
            Self::Update => "UPDATE",
            Self::Reject => "REJECT",
        }
    }
}

#[derive(Clone, Copy)]
pub struct Event {
    pub ts_ns:      u64,
    pub route:      Route,
    pub batch_size: u64,
    pub fallback:   bool,
    pub source:     Option<ModelSource>,
    pub rows:       u64,
}

const EMPTY: Event = Event {
    ts_ns: 0,
    route: Route::Reject,
    batch_size: 0,
    fallback: false,
    source: None,
    rows: 0,
};

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Totals {
    pub predicts:    u64,
    pub updates:     u64,
    pub rejects:     u64,
    pub fallbacks:   u64,
    pub from_device: u64,
    pub batch_sum:   u64,
}

pub struct EventLog {
    events:   Vec<Event>,
    head:     usize,
    len:      usize,
    totals:   Totals,
    start_ns: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: vec![EMPTY; MAX_EVENTS],
            head: 0,
            len: 0,
            totals: Totals::default(),
            start_ns: now_ns(),
        }
    }

    fn push(&mut self, event: Event) {
        self.events[self.head] = event;
        self.head = (self.head + 1) % MAX_EVENTS;
        if self.len < MAX_EVENTS {
            self.len += 1;
        }
    }

    pub fn predict(&mut self, batch_size: u64, fallback: bool, source: Option<ModelSource>, rows: usize) {
        self.totals.predicts += 1;
        self.totals.batch_sum += batch_size;
        if fallback {
            self.totals.fallbacks += 1;
        }
        if source == Some(ModelSource::Device) {
            self.totals.from_device += 1;
        }
        self.push(Event {
            ts_ns: now_ns(),
            route: Route::Predict,
            batch_size,
            fallback,
            source,
            rows: rows as u64,
        });
    }

    pub fn update(&mut self, rows: usize) {
        self.totals.updates += 1;
        self.push(Event { ts_ns: now_ns(), route: Route::Update, rows: rows as u64, ..EMPTY });
    }

    pub fn reject(&mut self) {
        self.totals.rejects += 1;
        self.push(Event { ts_ns: now_ns(), route: Route::Reject, ..EMPTY });
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ITERATE EVENTS IN CHRONOLOGICAL ORDER
    fn iter_chronological(&self) -> impl Iterator<Item = &Event> {
        let start = if self.len < MAX_EVENTS { 0 } else { self.head };
        (0..self.len).map(move |i| &self.events[(start + i) % MAX_EVENTS])
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<8} {:<8} {:<8} {:<8} {:<10}",
            "TIME_S", "ROUTE", "BATCH", "MODEL", "FALLBK", "ROWS");
        println!("{}", "-".repeat(56));

        for e in std::iter::once(first).chain(iter) {
            let elapsed_s = e.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            let model = e.source.map_or("-", ModelSource::label);
            println!("{:<10.3} {:<8} {:<8} {:<8} {:<8} {:<10}",
                elapsed_s, e.route.label(), e.batch_size, model,
                if e.fallback { "YES" } else { "-" }, e.rows);
        }

        if self.len == MAX_EVENTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} EVENTS)", MAX_EVENTS);
        }
        println!("TOTAL EVENTS: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        let t = self.totals;
        let elapsed_s = now_ns().saturating_sub(self.start_ns) as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("MOBATCH SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  REQUESTS:          {}", t.predicts + t.updates + t.rejects);
        println!("  PREDICT:           {}", t.predicts);
        println!("  UPDATE:            {}", t.updates);
        println!("  REJECTED:          {}", t.rejects);
        if t.predicts > 0 {
            println!("  MEAN BATCH SIZE:   {:.1}", t.batch_sum as f64 / t.predicts as f64);
            let dev_pct = t.from_device as f64 / t.predicts as f64 * 100.0;
            println!("  MODEL:             DEVICE {:.1}% / GLOBAL {:.1}%", dev_pct, 100.0 - dev_pct);
            println!("  FALLBACKS:         {}", t.fallbacks);
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}
