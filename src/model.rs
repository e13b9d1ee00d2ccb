use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::window;

/// Milliseconds on the business-local axis. Overlap checks compare only these.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Booking status ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Draft,
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

/// Everything that can move a booking's `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Payment callback succeeded.
    PaymentCompleted,
    /// Staff picked a new status explicitly.
    SetStatus(BookingStatus),
    Cancel,
}

impl LifecycleAction {
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleAction::PaymentCompleted => "complete payment",
            LifecycleAction::SetStatus(BookingStatus::Draft) => "set status draft",
            LifecycleAction::SetStatus(BookingStatus::Pending) => "set status pending",
            LifecycleAction::SetStatus(BookingStatus::Confirmed) => "set status confirmed",
            LifecycleAction::SetStatus(BookingStatus::Completed) => "set status completed",
            LifecycleAction::SetStatus(BookingStatus::Cancelled) => "set status cancelled",
            LifecycleAction::Cancel => "cancel",
        }
    }
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Draft,
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Draft => "draft",
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<BookingStatus> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// The transition table. Every status change goes through here.
    ///
    /// `draft` leaves only through payment or cancellation; `completed` and
    /// `cancelled` never leave.
    pub fn apply(self, action: LifecycleAction) -> Option<BookingStatus> {
        use BookingStatus::*;
        match (self, action) {
            (Draft | Pending, LifecycleAction::PaymentCompleted) => Some(Pending),
            (Pending, LifecycleAction::SetStatus(to @ (Confirmed | Completed | Cancelled))) => {
                Some(to)
            }
            (Confirmed, LifecycleAction::SetStatus(to @ (Completed | Cancelled))) => Some(to),
            (from, LifecycleAction::Cancel) if !from.is_terminal() => Some(Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultantStatus {
    Active,
    Inactive,
}

// ── Reminders ────────────────────────────────────────────────────

/// Which of the two scheduler ticks evaluates a reminder kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Fine,
    Coarse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReminderKind {
    TwelveHours,
    OneHour,
    OneMinute,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 3] = [
        ReminderKind::TwelveHours,
        ReminderKind::OneHour,
        ReminderKind::OneMinute,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ReminderKind::TwelveHours => "12hr",
            ReminderKind::OneHour => "1hr",
            ReminderKind::OneMinute => "1min",
        }
    }

    pub fn parse(label: &str) -> Option<ReminderKind> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }

    /// How long before the appointment the reminder is due.
    pub fn lead(&self) -> Duration {
        match self {
            ReminderKind::TwelveHours => Duration::hours(12),
            ReminderKind::OneHour => Duration::hours(1),
            ReminderKind::OneMinute => Duration::minutes(1),
        }
    }

    /// Half-width of the window around `now + lead` that counts as due.
    pub fn tolerance(&self) -> Duration {
        match self.cadence() {
            Cadence::Fine => Duration::seconds(30),
            Cadence::Coarse => Duration::minutes(30),
        }
    }

    pub fn cadence(&self) -> Cadence {
        match self {
            ReminderKind::OneMinute => Cadence::Fine,
            ReminderKind::TwelveHours | ReminderKind::OneHour => Cadence::Coarse,
        }
    }
}

/// One sent-timestamp per reminder kind; `Some` doubles as the sent flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderFlags {
    pub twelve_hours: Option<DateTime<Utc>>,
    pub one_hour: Option<DateTime<Utc>>,
    pub one_minute: Option<DateTime<Utc>>,
}

impl ReminderFlags {
    fn slot(&mut self, kind: ReminderKind) -> &mut Option<DateTime<Utc>> {
        match kind {
            ReminderKind::TwelveHours => &mut self.twelve_hours,
            ReminderKind::OneHour => &mut self.one_hour,
            ReminderKind::OneMinute => &mut self.one_minute,
        }
    }

    pub fn sent_at(&self, kind: ReminderKind) -> Option<DateTime<Utc>> {
        match kind {
            ReminderKind::TwelveHours => self.twelve_hours,
            ReminderKind::OneHour => self.one_hour,
            ReminderKind::OneMinute => self.one_minute,
        }
    }

    pub fn is_sent(&self, kind: ReminderKind) -> bool {
        self.sent_at(kind).is_some()
    }

    /// Set the flag if unset. Returns false if it was already set.
    pub fn mark(&mut self, kind: ReminderKind, at: DateTime<Utc>) -> bool {
        let slot = self.slot(kind);
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }

    /// Clear the flag only if it still carries the given timestamp.
    pub fn clear_if(&mut self, kind: ReminderKind, at: DateTime<Utc>) -> bool {
        let slot = self.slot(kind);
        if *slot == Some(at) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

// ── Documents ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultantContact {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingLink {
    pub url: String,
    pub external_event_id: String,
}

/// One customer's reservation. `reference_id` is also the store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub reference_id: String,
    pub date: NaiveDate,
    pub time_slot: NaiveTime,
    pub duration_minutes: u32,
    pub customer: CustomerContact,
    /// Empty string means unassigned (the shared pool).
    pub assigned_consultant: String,
    pub consultant_contact: Option<ConsultantContact>,
    /// Minor currency units.
    pub amount: u64,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub meeting: Option<MeetingLink>,
    pub reminders: ReminderFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Slot interval on the business-local clock. Durations are validated
    /// before a booking is ever written, so the span is never empty.
    pub fn span(&self) -> Span {
        let start = window::start_ms(self.date, self.time_slot);
        Span {
            start,
            end: start + Ms::from(self.duration_minutes) * window::MINUTE_MS,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }

    /// Paid and not cancelled: occupies its slot for good.
    pub fn occupies_slot(&self) -> bool {
        self.is_paid() && self.status != BookingStatus::Cancelled
    }

    /// An unpaid draft younger than `hold_ttl` still holds its slot.
    pub fn is_fresh_draft(&self, now: Ms, hold_ttl: Ms) -> bool {
        self.status == BookingStatus::Draft
            && self.payment_status == PaymentStatus::Pending
            && self.created_at.timestamp_millis() + hold_ttl > now
    }

    pub fn consultant_id(&self) -> Option<&str> {
        if self.assigned_consultant.is_empty() {
            None
        } else {
            Some(&self.assigned_consultant)
        }
    }

    /// Reminders only go out for paid bookings that are still live.
    pub fn wants_reminders(&self) -> bool {
        self.is_paid() && matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPatch {
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub assigned_consultant: Option<String>,
    pub consultant_contact: Option<ConsultantContact>,
    pub meeting: Option<MeetingLink>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl BookingPatch {
    pub fn apply(&self, booking: &mut Booking, at: DateTime<Utc>) {
        if let Some(s) = self.status {
            booking.status = s;
        }
        if let Some(p) = self.payment_status {
            booking.payment_status = p;
        }
        if let Some(ref c) = self.assigned_consultant {
            booking.assigned_consultant = c.clone();
        }
        if let Some(ref c) = self.consultant_contact {
            booking.consultant_contact = Some(c.clone());
        }
        if let Some(ref m) = self.meeting {
            booking.meeting = Some(m.clone());
        }
        if let Some(c) = self.cancelled_at {
            booking.cancelled_at = Some(c);
        }
        booking.updated_at = at;
    }
}

/// Equality filters supported by the store's query primitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub date: Option<NaiveDate>,
    pub payment_status: Option<PaymentStatus>,
    pub status: Option<BookingStatus>,
    pub assigned_consultant: Option<String>,
}

impl BookingFilter {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn paid(mut self) -> Self {
        self.payment_status = Some(PaymentStatus::Completed);
        self
    }

    pub fn assigned_to(mut self, consultant_id: &str) -> Self {
        self.assigned_consultant = Some(consultant_id.to_string());
        self
    }

    pub fn matches(&self, b: &Booking) -> bool {
        self.date.is_none_or(|d| b.date == d)
            && self.payment_status.is_none_or(|p| b.payment_status == p)
            && self.status.is_none_or(|s| b.status == s)
            && self
                .assigned_consultant
                .as_ref()
                .is_none_or(|c| &b.assigned_consultant == c)
    }
}

/// Consultant-declared blackout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub reason: Option<String>,
}

impl UnavailableSlot {
    /// An `end_time` of 00:00 means the end of `date`, so `22:00..00:00`
    /// blocks the rest of the evening and `00:00..00:00` the whole day.
    pub fn span(&self) -> Span {
        let start = window::start_ms(self.date, self.start_time);
        let end = if self.end_time == NaiveTime::default() {
            window::start_ms(self.date, self.end_time) + window::DAY_MS
        } else {
            window::start_ms(self.date, self.end_time)
        };
        Span { start, end }
    }

    /// Starts before it ends, counting a 00:00 end as midnight.
    pub fn is_well_formed(&self) -> bool {
        let span = self.span();
        span.start < span.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultant {
    pub id: String,
    pub name: String,
    pub email: String,
    pub status: ConsultantStatus,
    pub unavailable_slots: Vec<UnavailableSlot>,
}

impl Consultant {
    pub fn contact(&self) -> ConsultantContact {
        ConsultantContact {
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConsultantStatus::Active
    }
}

/// Per-business, per-year sequence behind reference ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearCounter {
    pub year: i32,
    pub counter: u32,
    pub last_updated: DateTime<Utc>,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    BookingInserted(Booking),
    BookingPatched {
        reference_id: String,
        patch: BookingPatch,
        at: DateTime<Utc>,
    },
    ReminderMarked {
        reference_id: String,
        kind: ReminderKind,
        at: DateTime<Utc>,
    },
    ReminderCleared {
        reference_id: String,
        kind: ReminderKind,
        at: DateTime<Utc>,
    },
    ConsultantPut(Consultant),
    CounterWritten(YearCounter),
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    pub fn booking(reference_id: &str, d: &str, t: &str, minutes: u32) -> Booking {
        let now = Utc::now();
        Booking {
            reference_id: reference_id.to_string(),
            date: date(d),
            time_slot: time(t),
            duration_minutes: minutes,
            customer: CustomerContact {
                name: "Asha".into(),
                email: "asha@example.com".into(),
                phone: None,
            },
            assigned_consultant: String::new(),
            consultant_contact: None,
            amount: 150_000,
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Draft,
            meeting: None,
            reminders: ReminderFlags::default(),
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for from in [BookingStatus::Completed, BookingStatus::Cancelled] {
            for to in BookingStatus::ALL {
                assert_eq!(from.apply(LifecycleAction::SetStatus(to)), None);
            }
            assert_eq!(from.apply(LifecycleAction::Cancel), None);
            assert_eq!(from.apply(LifecycleAction::PaymentCompleted), None);
        }
    }

    #[test]
    fn draft_leaves_only_by_payment_or_cancel() {
        for to in BookingStatus::ALL {
            assert_eq!(BookingStatus::Draft.apply(LifecycleAction::SetStatus(to)), None);
        }
        assert_eq!(
            BookingStatus::Draft.apply(LifecycleAction::PaymentCompleted),
            Some(BookingStatus::Pending)
        );
        assert_eq!(
            BookingStatus::Draft.apply(LifecycleAction::Cancel),
            Some(BookingStatus::Cancelled)
        );
    }

    #[test]
    fn pending_and_confirmed_transitions() {
        let p = BookingStatus::Pending;
        assert_eq!(
            p.apply(LifecycleAction::SetStatus(BookingStatus::Confirmed)),
            Some(BookingStatus::Confirmed)
        );
        assert_eq!(
            p.apply(LifecycleAction::SetStatus(BookingStatus::Completed)),
            Some(BookingStatus::Completed)
        );
        assert_eq!(p.apply(LifecycleAction::SetStatus(BookingStatus::Pending)), None);
        assert_eq!(p.apply(LifecycleAction::SetStatus(BookingStatus::Draft)), None);

        let c = BookingStatus::Confirmed;
        assert_eq!(
            c.apply(LifecycleAction::SetStatus(BookingStatus::Completed)),
            Some(BookingStatus::Completed)
        );
        assert_eq!(
            c.apply(LifecycleAction::SetStatus(BookingStatus::Cancelled)),
            Some(BookingStatus::Cancelled)
        );
        assert_eq!(c.apply(LifecycleAction::SetStatus(BookingStatus::Pending)), None);
        assert_eq!(c.apply(LifecycleAction::PaymentCompleted), None);
    }

    #[test]
    fn status_parse_round_trips_names() {
        for s in BookingStatus::ALL {
            assert_eq!(BookingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BookingStatus::parse("archived"), None);
    }

    #[test]
    fn reminder_flags_set_at_most_once() {
        let mut flags = ReminderFlags::default();
        let first = Utc::now();
        assert!(flags.mark(ReminderKind::OneHour, first));
        assert!(!flags.mark(ReminderKind::OneHour, first + Duration::seconds(5)));
        assert_eq!(flags.sent_at(ReminderKind::OneHour), Some(first));
        assert!(!flags.is_sent(ReminderKind::TwelveHours));
    }

    #[test]
    fn reminder_clear_requires_matching_claim() {
        let mut flags = ReminderFlags::default();
        let at = Utc::now();
        flags.mark(ReminderKind::OneMinute, at);
        assert!(!flags.clear_if(ReminderKind::OneMinute, at + Duration::seconds(1)));
        assert!(flags.clear_if(ReminderKind::OneMinute, at));
        assert!(!flags.is_sent(ReminderKind::OneMinute));
    }

    #[test]
    fn reminder_kinds_by_cadence() {
        assert_eq!(ReminderKind::OneMinute.cadence(), Cadence::Fine);
        assert_eq!(ReminderKind::OneMinute.tolerance(), Duration::seconds(30));
        assert_eq!(ReminderKind::TwelveHours.tolerance(), Duration::minutes(30));
        assert_eq!(ReminderKind::parse("1hr"), Some(ReminderKind::OneHour));
    }

    #[test]
    fn blackout_ending_at_midnight_runs_to_end_of_day() {
        let slot = |from: &str, to: &str| UnavailableSlot {
            date: date("2030-03-10"),
            start_time: time(from),
            end_time: time(to),
            reason: None,
        };
        let evening = slot("22:00", "00:00");
        assert!(evening.is_well_formed());
        assert_eq!(evening.span().end - evening.span().start, 2 * 60 * 60_000);
        let whole_day = slot("00:00", "00:00").span();
        assert_eq!(whole_day.end - whole_day.start, crate::window::DAY_MS);
        assert!(!slot("11:00", "10:00").is_well_formed());
        assert!(!slot("10:00", "10:00").is_well_formed());
    }

    #[test]
    fn booking_span_uses_duration() {
        let b = booking("NAB_2030_0001", "2030-03-10", "09:00", 30);
        let span = b.span();
        assert_eq!(span.end - span.start, 30 * 60_000);
    }

    #[test]
    fn fresh_draft_expires_with_ttl() {
        let b = booking("NAB_2030_0001", "2030-03-10", "09:00", 30);
        let created = b.created_at.timestamp_millis();
        assert!(b.is_fresh_draft(created + 1_000, 5_000));
        assert!(!b.is_fresh_draft(created + 5_000, 5_000));
    }

    #[test]
    fn filter_matches_equality_fields() {
        let mut b = booking("NAB_2030_0001", "2030-03-10", "09:00", 30);
        b.assigned_consultant = "c1".into();
        b.payment_status = PaymentStatus::Completed;

        assert!(BookingFilter::on(date("2030-03-10")).paid().matches(&b));
        assert!(BookingFilter::default().assigned_to("c1").matches(&b));
        assert!(!BookingFilter::default().assigned_to("c2").matches(&b));
        assert!(!BookingFilter::on(date("2030-03-11")).matches(&b));
        let pending = BookingFilter {
            status: Some(BookingStatus::Pending),
            ..BookingFilter::default()
        };
        assert!(!pending.matches(&b));
    }

    #[test]
    fn patch_touches_only_given_fields() {
        let mut b = booking("NAB_2030_0001", "2030-03-10", "09:00", 30);
        let at = b.created_at + Duration::minutes(3);
        let patch = BookingPatch {
            payment_status: Some(PaymentStatus::Completed),
            status: Some(BookingStatus::Pending),
            ..BookingPatch::default()
        };
        patch.apply(&mut b, at);
        assert_eq!(b.status, BookingStatus::Pending);
        assert_eq!(b.payment_status, PaymentStatus::Completed);
        assert_eq!(b.assigned_consultant, "");
        assert_eq!(b.updated_at, at);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = StoreEvent::BookingInserted(booking("NAB_2030_0007", "2030-03-10", "09:00", 45));
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: StoreEvent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
