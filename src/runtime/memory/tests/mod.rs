//! Heap 单元测试
//!
//! 测试句柄分配、复用和类型化访问

use crate::runtime::memory::{Closure, Heap, HeapError, HeapValue, Table};
use crate::runtime::value::Value;

#[cfg(test)]
mod heap_tests {
    use super::*;

    #[test]
    fn test_heap_allocate() {
        let mut heap = Heap::new();
        let handle = heap.allocate(HeapValue::Table(Table::new()));
        assert_eq!(heap.len(), 1);
        assert!(heap.is_valid(handle));
        assert!(heap.table(handle).is_ok());
    }

    #[test]
    fn test_heap_reuses_freed_handles() {
        let mut heap = Heap::new();
        let first = heap.allocate(HeapValue::Cell(Value::Int(1)));
        heap.deallocate(first);
        assert!(!heap.is_valid(first));
        let second = heap.allocate(HeapValue::Cell(Value::Int(2)));
        assert_eq!(first, second);
        assert_eq!(heap.cell(second), Ok(&Value::Int(2)));
    }

    #[test]
    fn test_wrong_kind() {
        let mut heap = Heap::new();
        let cell = heap.allocate(HeapValue::Cell(Value::Nil));
        assert!(matches!(
            heap.table(cell),
            Err(HeapError::WrongKind { expected: "table", .. })
        ));
    }

    #[test]
    fn test_write_invalid_handle() {
        let mut heap = Heap::new();
        let h = heap.allocate(HeapValue::Cell(Value::Nil));
        heap.deallocate(h);
        assert_eq!(
            heap.write(h, HeapValue::Cell(Value::Int(1))),
            Err(HeapError::InvalidHandle(h))
        );
    }
}

#[cfg(test)]
mod ref_tests {
    use super::*;
    use crate::runtime::memory::Handle;

    #[test]
    fn test_table_refs() {
        let mut heap = Heap::new();
        let inner = heap.allocate(HeapValue::Table(Table::new()));
        let mut outer = Table::new();
        outer.set_str("child", Value::Table(inner));
        let outer = HeapValue::Table(outer);

        let mut seen = Vec::new();
        outer.for_each_ref(&mut |h| seen.push(h));
        assert_eq!(seen, vec![inner]);
    }

    #[test]
    fn test_remap_closure() {
        let mut value = HeapValue::Closure(Closure {
            proto: 0,
            upvalues: vec![Handle(4), Handle(9)],
        });
        value
            .remap_refs(&mut |h: Handle| Ok::<_, ()>(Handle(h.0 + 1)))
            .unwrap();
        match value {
            HeapValue::Closure(c) => assert_eq!(c.upvalues, vec![Handle(5), Handle(10)]),
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod future_tests {
    use super::*;
    use crate::kernel::{Future, NetValue};

    #[test]
    fn test_only_unresolved_futures_are_pending() {
        let mut heap = Heap::new();
        let _cell = heap.allocate(HeapValue::Cell(Value::Nil));
        let a = heap.allocate(HeapValue::Future(Future::new("a", Vec::new())));
        let b = heap.allocate(HeapValue::Future(Future::new("b", Vec::new())));
        assert_eq!(heap.pending_futures().collect::<Vec<_>>(), vec![a, b]);

        heap.complete_future(a, Ok(vec![NetValue::Int(1)])).unwrap();
        assert_eq!(heap.pending_futures().collect::<Vec<_>>(), vec![b]);
        assert_eq!(heap.future(a).unwrap().output, Some(Ok(vec![NetValue::Int(1)])));

        heap.deallocate(b);
        assert_eq!(heap.pending_futures().count(), 0);
    }

    #[test]
    fn test_write_over_a_future_updates_pending() {
        let mut heap = Heap::new();
        let h = heap.allocate(HeapValue::Cell(Value::Nil));
        heap.write(h, HeapValue::Future(Future::new("m", Vec::new()))).unwrap();
        assert_eq!(heap.pending_futures().collect::<Vec<_>>(), vec![h]);

        heap.write(h, HeapValue::Cell(Value::Int(2))).unwrap();
        assert_eq!(heap.pending_futures().count(), 0);

        let mut done = Future::new("m", Vec::new());
        done.output = Some(Err("boom".into()));
        heap.write(h, HeapValue::Future(done)).unwrap();
        assert_eq!(heap.pending_futures().count(), 0);
    }
}
